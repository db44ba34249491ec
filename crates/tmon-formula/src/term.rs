use crate::error::FormulaError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tmon_schemas::{Value, ValueType};

/// Variable name. Tables order their columns by it.
pub type Var = String;

/// Arithmetic expression over variables and constants.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Var(Var),
    Const(Value),
    Neg(Box<Term>),
    Add(Box<Term>, Box<Term>),
    Sub(Box<Term>, Box<Term>),
    Mul(Box<Term>, Box<Term>),
    Div(Box<Term>, Box<Term>),
}

impl Term {
    pub fn var(name: &str) -> Self {
        Term::Var(name.to_string())
    }

    pub fn val(value: impl Into<Value>) -> Self {
        Term::Const(value.into())
    }

    pub fn int(v: i64) -> Self {
        Term::Const(Value::Int(v))
    }

    pub fn float(v: f64) -> Self {
        Term::Const(Value::Float(v))
    }

    pub fn principal(v: &str) -> Self {
        Term::Const(Value::principal(v))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn neg(self) -> Self {
        Term::Neg(Box::new(self))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(self, rhs: Term) -> Self {
        Term::Add(Box::new(self), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn sub(self, rhs: Term) -> Self {
        Term::Sub(Box::new(self), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn mul(self, rhs: Term) -> Self {
        Term::Mul(Box::new(self), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn div(self, rhs: Term) -> Self {
        Term::Div(Box::new(self), Box::new(rhs))
    }

    pub fn as_var(&self) -> Option<&str> {
        match self {
            Term::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn collect_vars(&self, out: &mut BTreeSet<Var>) {
        match self {
            Term::Var(v) => {
                out.insert(v.clone());
            }
            Term::Const(_) => {}
            Term::Neg(t) => t.collect_vars(out),
            Term::Add(a, b) | Term::Sub(a, b) | Term::Mul(a, b) | Term::Div(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }

    pub fn vars(&self) -> BTreeSet<Var> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    /// Result type given the types of its variables.
    pub fn infer_type(&self, types: &BTreeMap<Var, ValueType>) -> Result<ValueType, FormulaError> {
        match self {
            Term::Var(v) => types.get(v).copied().ok_or_else(|| FormulaError::UnsafeFormula {
                reason: format!("variable '{v}' is not bound by a positive context"),
            }),
            Term::Const(c) => Ok(c.value_type()),
            Term::Neg(t) => {
                let ty = t.infer_type(types)?;
                if !ty.is_numeric() {
                    return Err(FormulaError::NonNumericTerm { ty });
                }
                Ok(ty)
            }
            Term::Add(a, b) | Term::Sub(a, b) | Term::Mul(a, b) | Term::Div(a, b) => {
                let ta = a.infer_type(types)?;
                let tb = b.infer_type(types)?;
                for ty in [ta, tb] {
                    if !ty.is_numeric() {
                        return Err(FormulaError::NonNumericTerm { ty });
                    }
                }
                if ta == ValueType::Int && tb == ValueType::Int {
                    Ok(ValueType::Int)
                } else {
                    Ok(ValueType::Float)
                }
            }
        }
    }

    /// Evaluate under `lookup`. `None` when a variable is unbound or the result
    /// is undefined (integer overflow, integer division by zero).
    pub fn eval<'a, F>(&self, lookup: &F) -> Option<Value>
    where
        F: Fn(&str) -> Option<&'a Value>,
    {
        match self {
            Term::Var(v) => lookup(v).cloned(),
            Term::Const(c) => Some(c.clone()),
            Term::Neg(t) => match t.eval(lookup)? {
                Value::Int(i) => i.checked_neg().map(Value::Int),
                Value::Float(x) => Some(Value::Float(-x)),
                _ => None,
            },
            Term::Add(a, b) => arith(a.eval(lookup)?, b.eval(lookup)?, i64::checked_add, |x, y| x + y),
            Term::Sub(a, b) => arith(a.eval(lookup)?, b.eval(lookup)?, i64::checked_sub, |x, y| x - y),
            Term::Mul(a, b) => arith(a.eval(lookup)?, b.eval(lookup)?, i64::checked_mul, |x, y| x * y),
            Term::Div(a, b) => arith(a.eval(lookup)?, b.eval(lookup)?, i64::checked_div, |x, y| x / y),
        }
    }
}

fn arith(
    a: Value,
    b: Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Option<Value> {
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => int_op(*x, *y).map(Value::Int),
        _ => Some(Value::Float(float_op(a.as_f64()?, b.as_f64()?))),
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(v) => f.write_str(v),
            Term::Const(c) => write!(f, "{c}"),
            Term::Neg(t) => write!(f, "-({t})"),
            Term::Add(a, b) => write!(f, "({a} + {b})"),
            Term::Sub(a, b) => write!(f, "({a} - {b})"),
            Term::Mul(a, b) => write!(f, "({a} * {b})"),
            Term::Div(a, b) => write!(f, "({a} / {b})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Incomparable values never satisfy any operator, `Ne` included.
    pub fn holds(self, left: &Value, right: &Value) -> bool {
        let Some(ord) = left.compare(right) else {
            return false;
        };
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn int_arithmetic_stays_int_and_promotes_with_float() {
        let e = env(&[("n", Value::int(6)), ("m", Value::float(2.5))]);
        let lookup = |name: &str| e.get(name);

        let sq = Term::var("n").sub(Term::var("m"));
        let sq = sq.clone().mul(sq);
        assert_eq!(sq.eval(&lookup), Some(Value::float(12.25)));

        let half = Term::var("n").div(Term::int(4));
        assert_eq!(half.eval(&lookup), Some(Value::int(1)));
    }

    #[test]
    fn undefined_results_are_none() {
        let e = env(&[("n", Value::int(1))]);
        let lookup = |name: &str| e.get(name);
        assert_eq!(Term::var("n").div(Term::int(0)).eval(&lookup), None);
        assert_eq!(Term::int(i64::MAX).add(Term::var("n")).eval(&lookup), None);
        assert_eq!(Term::var("missing").eval(&lookup), None);
    }

    #[test]
    fn type_inference_rejects_non_numeric_arithmetic() {
        let mut types = BTreeMap::new();
        types.insert("s".to_string(), ValueType::Principal);
        types.insert("n".to_string(), ValueType::Int);
        assert_eq!(
            Term::var("n").add(Term::int(1)).infer_type(&types),
            Ok(ValueType::Int)
        );
        assert_eq!(
            Term::var("n").div(Term::float(2.0)).infer_type(&types),
            Ok(ValueType::Float)
        );
        assert!(matches!(
            Term::var("s").add(Term::int(1)).infer_type(&types),
            Err(FormulaError::NonNumericTerm { ty: ValueType::Principal })
        ));
    }

    #[test]
    fn cmp_ops() {
        assert!(CmpOp::Le.holds(&Value::int(2), &Value::float(2.0)));
        assert!(CmpOp::Gt.holds(&Value::float(4.75), &Value::int(4)));
        assert!(!CmpOp::Ne.holds(&Value::str("a"), &Value::int(1)));
    }
}
