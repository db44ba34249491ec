use crate::term::{CmpOp, Term, Var};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tmon_schemas::Value;

/// Closed time interval `[lo, hi]` in seconds. `hi = None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub lo: u64,
    pub hi: Option<u64>,
}

impl Interval {
    pub fn bounded(lo: u64, hi: u64) -> Self {
        Self { lo, hi: Some(hi) }
    }

    pub fn unbounded(lo: u64) -> Self {
        Self { lo, hi: None }
    }

    /// Whether a distance `d` between two timestamps falls inside the interval.
    pub fn contains(&self, d: u64) -> bool {
        d >= self.lo && self.hi.map_or(true, |hi| d <= hi)
    }

    pub fn is_bounded(&self) -> bool {
        self.hi.is_some()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hi {
            Some(hi) => write!(f, "[{},{}]", self.lo, hi),
            None => write!(f, "[{},*)", self.lo),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggOp {
    Cnt,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggOp::Cnt => "CNT",
            AggOp::Sum => "SUM",
            AggOp::Avg => "AVG",
            AggOp::Min => "MIN",
            AggOp::Max => "MAX",
        };
        f.write_str(s)
    }
}

/// Author-facing formula tree. Compiled into a [`crate::Formula`] against a
/// signature, which is where safety and typing are enforced.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Atom { relation: String, args: Vec<Term> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare { op: CmpOp, left: Term, right: Term },
    Exists { vars: Vec<Var>, body: Box<Expr> },
    Once { interval: Interval, body: Box<Expr> },
    Eventually { interval: Interval, body: Box<Expr> },
    /// `result <- op over; group_by` over the assignments of `body`.
    /// `over` may be omitted for `CNT`, which then counts rows.
    Aggregate {
        op: AggOp,
        result: Var,
        over: Option<Var>,
        group_by: Vec<Var>,
        body: Box<Expr>,
    },
    /// `body` plus a `result := default` row for every `keys` assignment
    /// that `body` does not cover.
    Fill {
        body: Box<Expr>,
        keys: Box<Expr>,
        result: Var,
        default: Value,
    },
}

impl Expr {
    pub fn atom(relation: &str, args: impl IntoIterator<Item = Term>) -> Self {
        Expr::Atom {
            relation: relation.to_string(),
            args: args.into_iter().collect(),
        }
    }

    /// Atom whose arguments are all variables.
    pub fn pred(relation: &str, vars: &[&str]) -> Self {
        Self::atom(relation, vars.iter().map(|v| Term::var(v)))
    }

    pub fn and(self, rhs: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(rhs))
    }

    pub fn and_not(self, rhs: Expr) -> Self {
        self.and(Expr::negate(rhs))
    }

    pub fn or(self, rhs: Expr) -> Self {
        Expr::Or(Box::new(self), Box::new(rhs))
    }

    pub fn negate(inner: Expr) -> Self {
        Expr::Not(Box::new(inner))
    }

    pub fn cmp(op: CmpOp, left: Term, right: Term) -> Self {
        Expr::Compare { op, left, right }
    }

    pub fn eq(left: Term, right: Term) -> Self {
        Self::cmp(CmpOp::Eq, left, right)
    }

    pub fn exists(vars: &[&str], body: Expr) -> Self {
        Expr::Exists {
            vars: vars.iter().map(|v| v.to_string()).collect(),
            body: Box::new(body),
        }
    }

    pub fn once(interval: Interval, body: Expr) -> Self {
        Expr::Once {
            interval,
            body: Box::new(body),
        }
    }

    pub fn eventually(interval: Interval, body: Expr) -> Self {
        Expr::Eventually {
            interval,
            body: Box::new(body),
        }
    }

    pub fn aggregate(op: AggOp, result: &str, over: &str, group_by: &[&str], body: Expr) -> Self {
        Expr::Aggregate {
            op,
            result: result.to_string(),
            over: Some(over.to_string()),
            group_by: group_by.iter().map(|v| v.to_string()).collect(),
            body: Box::new(body),
        }
    }

    /// `CNT` of rows per group.
    pub fn count(result: &str, group_by: &[&str], body: Expr) -> Self {
        Expr::Aggregate {
            op: AggOp::Cnt,
            result: result.to_string(),
            over: None,
            group_by: group_by.iter().map(|v| v.to_string()).collect(),
            body: Box::new(body),
        }
    }

    pub fn fill(body: Expr, keys: Expr, result: &str, default: Value) -> Self {
        Expr::Fill {
            body: Box::new(body),
            keys: Box::new(keys),
            result: result.to_string(),
            default,
        }
    }

    /// Free variables, before any safety analysis.
    pub fn free_vars(&self) -> BTreeSet<Var> {
        match self {
            Expr::Atom { args, .. } => {
                let mut out = BTreeSet::new();
                for a in args {
                    a.collect_vars(&mut out);
                }
                out
            }
            Expr::And(a, b) | Expr::Or(a, b) => {
                let mut out = a.free_vars();
                out.extend(b.free_vars());
                out
            }
            Expr::Not(e) => e.free_vars(),
            Expr::Compare { left, right, .. } => {
                let mut out = left.vars();
                right.collect_vars(&mut out);
                out
            }
            Expr::Exists { vars, body } => {
                let mut out = body.free_vars();
                for v in vars {
                    out.remove(v);
                }
                out
            }
            Expr::Once { body, .. } | Expr::Eventually { body, .. } => body.free_vars(),
            Expr::Aggregate {
                result, group_by, ..
            } => {
                let mut out: BTreeSet<Var> = group_by.iter().cloned().collect();
                out.insert(result.clone());
                out
            }
            Expr::Fill { body, .. } => body.free_vars(),
        }
    }
}
