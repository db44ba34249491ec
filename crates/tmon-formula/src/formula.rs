use crate::error::FormulaError;
use crate::expr::{AggOp, Expr, Interval};
use crate::term::{CmpOp, Term, Var};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tmon_schemas::{Signature, Value, ValueType};

/// Dense index of a node inside one compiled formula. Evaluation state is keyed by it.
pub type NodeId = usize;

/// Compiled atom argument: a column of the atom's table or a constant selection.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomArg {
    Column(usize),
    Const(Value),
}

/// How a conjunction is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AndMode {
    /// Natural join on shared variables.
    Join,
    /// Right operand is `Not(φ)` with `fv(φ) ⊆ fv(left)`.
    AntiJoin,
    /// Right operand is a comparison over variables of the left operand.
    Filter,
    /// Right operand is `x = term`, `x` new, `term` over the left operand.
    Assign,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Atom {
        relation: String,
        args: Vec<AtomArg>,
    },
    And {
        mode: AndMode,
        left: Box<Node>,
        right: Box<Node>,
    },
    Or {
        left: Box<Node>,
        right: Box<Node>,
    },
    Not {
        inner: Box<Node>,
    },
    Compare {
        op: CmpOp,
        left: Term,
        right: Term,
    },
    Exists {
        vars: Vec<Var>,
        inner: Box<Node>,
    },
    Once {
        interval: Interval,
        inner: Box<Node>,
    },
    Eventually {
        interval: Interval,
        inner: Box<Node>,
    },
    Aggregate {
        op: AggOp,
        result: Var,
        over: Option<Var>,
        group_by: Vec<Var>,
        inner: Box<Node>,
    },
    Fill {
        inner: Box<Node>,
        keys: Box<Node>,
        result: Var,
        default: Value,
    },
}

/// One operator of a compiled formula, with its free variables (sorted, which
/// is also the column order of its tables) and their types.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub free_vars: Vec<Var>,
    pub var_types: BTreeMap<Var, ValueType>,
}

impl Node {
    pub fn is_closed(&self) -> bool {
        self.free_vars.is_empty()
    }

    pub fn children(&self) -> Vec<&Node> {
        match &self.kind {
            NodeKind::Atom { .. } | NodeKind::Compare { .. } => Vec::new(),
            NodeKind::And { left, right, .. } | NodeKind::Or { left, right } => {
                vec![left.as_ref(), right.as_ref()]
            }
            NodeKind::Fill { inner, keys, .. } => vec![inner.as_ref(), keys.as_ref()],
            NodeKind::Not { inner }
            | NodeKind::Exists { inner, .. }
            | NodeKind::Once { inner, .. }
            | NodeKind::Eventually { inner, .. }
            | NodeKind::Aggregate { inner, .. } => vec![inner.as_ref()],
        }
    }

    fn horizon(&self) -> u64 {
        let below = self
            .children()
            .into_iter()
            .map(Node::horizon)
            .max()
            .unwrap_or(0);
        match &self.kind {
            NodeKind::Eventually { interval, inner } => interval
                .hi
                .unwrap_or(0)
                .saturating_add(inner.horizon()),
            _ => below,
        }
    }
}

/// A safe, typed, immutable formula ready for evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    root: Node,
    node_count: usize,
}

impl Formula {
    /// Check safety and types of `expr` against `signature` and assign node ids.
    pub fn compile(expr: &Expr, signature: &Signature) -> Result<Self, FormulaError> {
        let mut compiler = Compiler {
            signature,
            next_id: 0,
        };
        let root = compiler.compile(expr)?;
        Ok(Self {
            root,
            node_count: compiler.next_id,
        })
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn free_vars(&self) -> &[Var] {
        &self.root.free_vars
    }

    /// A closed formula is a boolean policy: it holds iff its table is non-empty.
    pub fn is_closed(&self) -> bool {
        self.root.is_closed()
    }

    /// Largest total lookahead along any path; a verdict for `t` is final once
    /// the watermark passes `t` plus this value.
    pub fn future_horizon(&self) -> u64 {
        self.root.horizon()
    }
}

struct Compiler<'a> {
    signature: &'a Signature,
    next_id: NodeId,
}

impl Compiler<'_> {
    fn node(
        &mut self,
        kind: NodeKind,
        free_vars: BTreeSet<Var>,
        var_types: BTreeMap<Var, ValueType>,
    ) -> Node {
        let id = self.next_id;
        self.next_id += 1;
        Node {
            id,
            kind,
            free_vars: free_vars.into_iter().collect(),
            var_types,
        }
    }

    fn compile(&mut self, expr: &Expr) -> Result<Node, FormulaError> {
        match expr {
            Expr::Atom { relation, args } => self.atom(relation, args),
            Expr::And(a, b) => self.conjunction(a, b),
            Expr::Or(a, b) => {
                let left = self.compile(a)?;
                let right = self.compile(b)?;
                if left.free_vars != right.free_vars {
                    return Err(FormulaError::unsafe_formula(format!(
                        "disjuncts have different free variables {:?} and {:?}",
                        left.free_vars, right.free_vars
                    )));
                }
                let mut types = left.var_types.clone();
                merge_types(&mut types, &right.var_types)?;
                let fv = left.free_vars.iter().cloned().collect();
                Ok(self.node(
                    NodeKind::Or {
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    fv,
                    types,
                ))
            }
            Expr::Not(inner) => {
                let inner = self.compile(inner)?;
                if !inner.is_closed() {
                    return Err(FormulaError::unsafe_formula(format!(
                        "negation over free variables {:?} must be the right operand of a conjunction that binds them",
                        inner.free_vars
                    )));
                }
                Ok(self.node(
                    NodeKind::Not {
                        inner: Box::new(inner),
                    },
                    BTreeSet::new(),
                    BTreeMap::new(),
                ))
            }
            Expr::Compare { op, left, right } => self.standalone_compare(*op, left, right),
            Expr::Exists { vars, body } => {
                let inner = self.compile(body)?;
                let mut fv: BTreeSet<Var> = inner.free_vars.iter().cloned().collect();
                let mut types = inner.var_types.clone();
                for v in vars {
                    fv.remove(v);
                    types.remove(v);
                }
                Ok(self.node(
                    NodeKind::Exists {
                        vars: vars.clone(),
                        inner: Box::new(inner),
                    },
                    fv,
                    types,
                ))
            }
            Expr::Once { interval, body } => {
                check_interval(interval)?;
                let inner = self.compile(body)?;
                let (fv, types) = same_columns(&inner);
                Ok(self.node(
                    NodeKind::Once {
                        interval: *interval,
                        inner: Box::new(inner),
                    },
                    fv,
                    types,
                ))
            }
            Expr::Eventually { interval, body } => {
                if interval.hi.is_none() {
                    return Err(FormulaError::UnboundedFuture);
                }
                check_interval(interval)?;
                let inner = self.compile(body)?;
                let (fv, types) = same_columns(&inner);
                Ok(self.node(
                    NodeKind::Eventually {
                        interval: *interval,
                        inner: Box::new(inner),
                    },
                    fv,
                    types,
                ))
            }
            Expr::Aggregate {
                op,
                result,
                over,
                group_by,
                body,
            } => self.aggregate(*op, result, over.as_ref(), group_by, body),
            Expr::Fill {
                body,
                keys,
                result,
                default,
            } => self.fill(body, keys, result, default),
        }
    }

    fn atom(&mut self, relation: &str, args: &[Term]) -> Result<Node, FormulaError> {
        let schema = self
            .signature
            .relation(relation)
            .ok_or_else(|| FormulaError::UnknownRelation {
                relation: relation.to_string(),
            })?;
        if schema.arity() != args.len() {
            return Err(FormulaError::ArityMismatch {
                relation: relation.to_string(),
                expected: schema.arity(),
                got: args.len(),
            });
        }

        let mut types = BTreeMap::new();
        for (position, (arg, field)) in args.iter().zip(&schema.fields).enumerate() {
            match arg {
                Term::Var(v) => merge_types(&mut types, &BTreeMap::from([(v.clone(), field.ty)]))?,
                Term::Const(c) => {
                    if c.value_type() != field.ty {
                        return Err(FormulaError::TypeConflict {
                            var: format!("{relation}.{}", field.name),
                            first: field.ty,
                            second: c.value_type(),
                        });
                    }
                }
                _ => {
                    return Err(FormulaError::InvalidAtomArgument {
                        relation: relation.to_string(),
                        position,
                    })
                }
            }
        }

        let fv: BTreeSet<Var> = types.keys().cloned().collect();
        let columns: Vec<&Var> = fv.iter().collect();
        let compiled = args
            .iter()
            .map(|arg| match arg {
                Term::Var(v) => AtomArg::Column(columns.binary_search(&v).unwrap_or(0)),
                Term::Const(c) => AtomArg::Const(c.clone()),
                _ => AtomArg::Column(0),
            })
            .collect();

        Ok(self.node(
            NodeKind::Atom {
                relation: relation.to_string(),
                args: compiled,
            },
            fv,
            types,
        ))
    }

    fn conjunction(&mut self, a: &Expr, b: &Expr) -> Result<Node, FormulaError> {
        // The constrained operand goes right; positive operands may be written either way.
        let (pos, other) = if is_open_negation(b) || is_comparison(b) {
            (a, b)
        } else if is_open_negation(a) || is_comparison(a) {
            (b, a)
        } else {
            (a, b)
        };

        if is_open_negation(pos) {
            return Err(FormulaError::unsafe_formula(
                "conjunction of two negated operands binds no variables",
            ));
        }

        let left = self.compile(pos)?;
        match other {
            Expr::Not(inner) if is_open_negation(other) => {
                let inner = self.compile(inner)?;
                let missing: Vec<&Var> = inner
                    .free_vars
                    .iter()
                    .filter(|v| !left.var_types.contains_key(*v))
                    .collect();
                if !missing.is_empty() {
                    return Err(FormulaError::unsafe_formula(format!(
                        "negated variables {missing:?} are not bound by the positive operand"
                    )));
                }
                let mut check = left.var_types.clone();
                merge_types(&mut check, &inner.var_types)?;

                let (inner_fv, inner_types) = same_columns(&inner);
                let right = self.node(
                    NodeKind::Not {
                        inner: Box::new(inner),
                    },
                    inner_fv,
                    inner_types,
                );
                let (fv, types) = same_columns(&left);
                Ok(self.node(
                    NodeKind::And {
                        mode: AndMode::AntiJoin,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    fv,
                    types,
                ))
            }
            Expr::Compare { op, left: lt, right: rt } => self.constrained(left, *op, lt, rt),
            _ => {
                let right = self.compile(other)?;
                let mut types = left.var_types.clone();
                merge_types(&mut types, &right.var_types)?;
                let fv = types.keys().cloned().collect();
                Ok(self.node(
                    NodeKind::And {
                        mode: AndMode::Join,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    fv,
                    types,
                ))
            }
        }
    }

    fn constrained(
        &mut self,
        left: Node,
        op: CmpOp,
        lt: &Term,
        rt: &Term,
    ) -> Result<Node, FormulaError> {
        let bound = |t: &Term| is_bound(&left.var_types, t);

        if bound(lt) && bound(rt) {
            let ltype = lt.infer_type(&left.var_types)?;
            let rtype = rt.infer_type(&left.var_types)?;
            check_comparable(ltype, rtype)?;
            let right = self.node(
                NodeKind::Compare {
                    op,
                    left: lt.clone(),
                    right: rt.clone(),
                },
                lt.vars().into_iter().chain(rt.vars()).collect(),
                BTreeMap::new(),
            );
            let (fv, types) = same_columns(&left);
            return Ok(self.node(
                NodeKind::And {
                    mode: AndMode::Filter,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                fv,
                types,
            ));
        }

        let assignment = match (
            op,
            unbound_var(&left.var_types, lt),
            unbound_var(&left.var_types, rt),
        ) {
            (CmpOp::Eq, Some(x), _) if bound(rt) => Some((x.to_string(), rt)),
            (CmpOp::Eq, _, Some(x)) if bound(lt) => Some((x.to_string(), lt)),
            _ => None,
        };
        let Some((var, term)) = assignment else {
            return Err(FormulaError::unsafe_formula(format!(
                "comparison {lt} {op} {rt} uses variables not bound by the left operand"
            )));
        };

        let ty = term.infer_type(&left.var_types)?;
        let mut types = left.var_types.clone();
        types.insert(var.clone(), ty);
        let right = self.node(
            NodeKind::Compare {
                op: CmpOp::Eq,
                left: Term::Var(var.clone()),
                right: term.clone(),
            },
            term.vars().into_iter().chain([var]).collect(),
            BTreeMap::new(),
        );
        let fv = types.keys().cloned().collect();
        Ok(self.node(
            NodeKind::And {
                mode: AndMode::Assign,
                left: Box::new(left),
                right: Box::new(right),
            },
            fv,
            types,
        ))
    }

    fn standalone_compare(
        &mut self,
        op: CmpOp,
        lt: &Term,
        rt: &Term,
    ) -> Result<Node, FormulaError> {
        let empty = BTreeMap::new();
        if lt.vars().is_empty() && rt.vars().is_empty() {
            check_comparable(lt.infer_type(&empty)?, rt.infer_type(&empty)?)?;
            return Ok(self.node(
                NodeKind::Compare {
                    op,
                    left: lt.clone(),
                    right: rt.clone(),
                },
                BTreeSet::new(),
                BTreeMap::new(),
            ));
        }

        // `x = closed-term` binds exactly one value.
        let binding = match (op, lt, rt) {
            (CmpOp::Eq, Term::Var(x), t) | (CmpOp::Eq, t, Term::Var(x)) if t.vars().is_empty() => {
                Some((x.clone(), t))
            }
            _ => None,
        };
        let Some((var, term)) = binding else {
            return Err(FormulaError::unsafe_formula(format!(
                "comparison {lt} {op} {rt} has free variables and no positive operand to bind them"
            )));
        };
        let ty = term.infer_type(&empty)?;
        Ok(self.node(
            NodeKind::Compare {
                op,
                left: Term::Var(var.clone()),
                right: term.clone(),
            },
            BTreeSet::from([var.clone()]),
            BTreeMap::from([(var, ty)]),
        ))
    }

    fn aggregate(
        &mut self,
        op: AggOp,
        result: &Var,
        over: Option<&Var>,
        group_by: &[Var],
        body: &Expr,
    ) -> Result<Node, FormulaError> {
        let inner = self.compile(body)?;
        let group: BTreeSet<Var> = group_by.iter().cloned().collect();

        if let Some(missing) = group.iter().find(|g| !inner.var_types.contains_key(*g)) {
            return Err(FormulaError::InvalidAggregate {
                reason: format!("group variable '{missing}' is not free in the aggregated formula"),
            });
        }
        if group.contains(result) {
            return Err(FormulaError::InvalidAggregate {
                reason: format!("result variable '{result}' is also a group variable"),
            });
        }

        let result_ty = match over {
            None if op == AggOp::Cnt => ValueType::Int,
            None => {
                return Err(FormulaError::InvalidAggregate {
                    reason: format!("{op} needs an aggregated variable"),
                })
            }
            Some(v) => {
                let ty = *inner
                    .var_types
                    .get(v)
                    .ok_or_else(|| FormulaError::InvalidAggregate {
                        reason: format!("aggregated variable '{v}' is not free in the aggregated formula"),
                    })?;
                match op {
                    AggOp::Cnt => ValueType::Int,
                    AggOp::Sum | AggOp::Avg if !ty.is_numeric() => {
                        return Err(FormulaError::NonNumericAggregate {
                            op,
                            var: v.clone(),
                            ty,
                        })
                    }
                    AggOp::Sum => ty,
                    AggOp::Avg => ValueType::Float,
                    AggOp::Min | AggOp::Max => ty,
                }
            }
        };

        let mut types: BTreeMap<Var, ValueType> = group
            .iter()
            .filter_map(|g| inner.var_types.get(g).map(|ty| (g.clone(), *ty)))
            .collect();
        types.insert(result.clone(), result_ty);
        let fv = types.keys().cloned().collect();

        Ok(self.node(
            NodeKind::Aggregate {
                op,
                result: result.clone(),
                over: over.cloned(),
                group_by: group.into_iter().collect(),
                inner: Box::new(inner),
            },
            fv,
            types,
        ))
    }

    fn fill(
        &mut self,
        body: &Expr,
        keys: &Expr,
        result: &Var,
        default: &Value,
    ) -> Result<Node, FormulaError> {
        let inner = self.compile(body)?;
        let keys = self.compile(keys)?;

        let Some(result_ty) = inner.var_types.get(result).copied() else {
            return Err(FormulaError::InvalidFill {
                reason: format!("'{result}' is not free in the filled formula"),
            });
        };
        if keys.var_types.contains_key(result) {
            return Err(FormulaError::InvalidFill {
                reason: format!("'{result}' must not be a key variable"),
            });
        }
        let mut expected: Vec<Var> = keys.free_vars.clone();
        expected.push(result.clone());
        expected.sort();
        if expected != inner.free_vars {
            return Err(FormulaError::InvalidFill {
                reason: format!(
                    "filled formula has variables {:?}, keys plus result give {:?}",
                    inner.free_vars, expected
                ),
            });
        }
        if default.value_type() != result_ty {
            return Err(FormulaError::TypeConflict {
                var: result.clone(),
                first: result_ty,
                second: default.value_type(),
            });
        }
        let mut types = inner.var_types.clone();
        merge_types(&mut types, &keys.var_types)?;

        let fv = types.keys().cloned().collect();
        Ok(self.node(
            NodeKind::Fill {
                inner: Box::new(inner),
                keys: Box::new(keys),
                result: result.clone(),
                default: default.clone(),
            },
            fv,
            types,
        ))
    }
}

fn is_open_negation(e: &Expr) -> bool {
    matches!(e, Expr::Not(inner) if !inner.free_vars().is_empty())
}

fn is_comparison(e: &Expr) -> bool {
    matches!(e, Expr::Compare { .. })
}

fn is_bound(types: &BTreeMap<Var, ValueType>, term: &Term) -> bool {
    term.vars().iter().all(|v| types.contains_key(v))
}

fn unbound_var<'t>(types: &BTreeMap<Var, ValueType>, term: &'t Term) -> Option<&'t str> {
    term.as_var().filter(|v| !types.contains_key(*v))
}

fn same_columns(node: &Node) -> (BTreeSet<Var>, BTreeMap<Var, ValueType>) {
    (
        node.free_vars.iter().cloned().collect(),
        node.var_types.clone(),
    )
}

fn merge_types(
    into: &mut BTreeMap<Var, ValueType>,
    from: &BTreeMap<Var, ValueType>,
) -> Result<(), FormulaError> {
    for (var, ty) in from {
        match into.get(var) {
            Some(existing) if existing != ty => {
                return Err(FormulaError::TypeConflict {
                    var: var.clone(),
                    first: *existing,
                    second: *ty,
                })
            }
            Some(_) => {}
            None => {
                into.insert(var.clone(), *ty);
            }
        }
    }
    Ok(())
}

fn check_comparable(left: ValueType, right: ValueType) -> Result<(), FormulaError> {
    if left.comparable_with(right) {
        Ok(())
    } else {
        Err(FormulaError::IncomparableTypes { left, right })
    }
}

fn check_interval(interval: &Interval) -> Result<(), FormulaError> {
    match interval.hi {
        Some(hi) if hi < interval.lo => Err(FormulaError::InvalidInterval { lo: interval.lo, hi }),
        _ => Ok(()),
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Atom { relation, args } => {
                let rendered: Vec<String> = args
                    .iter()
                    .map(|a| match a {
                        AtomArg::Column(i) => self.free_vars.get(*i).cloned().unwrap_or_default(),
                        AtomArg::Const(c) => c.to_string(),
                    })
                    .collect();
                write!(f, "{relation}({})", rendered.join(", "))
            }
            NodeKind::And { mode, left, right } => match (mode, &right.kind) {
                (AndMode::AntiJoin, NodeKind::Not { inner }) => {
                    write!(f, "({left} AND NOT {inner})")
                }
                _ => write!(f, "({left} AND {right})"),
            },
            NodeKind::Or { left, right } => write!(f, "({left} OR {right})"),
            NodeKind::Not { inner } => write!(f, "NOT {inner}"),
            NodeKind::Compare { op, left, right } => write!(f, "{left} {op} {right}"),
            NodeKind::Exists { vars, inner } => write!(f, "EXISTS {}. {inner}", vars.join(", ")),
            NodeKind::Once { interval, inner } => write!(f, "ONCE{interval} {inner}"),
            NodeKind::Eventually { interval, inner } => {
                write!(f, "EVENTUALLY{interval} {inner}")
            }
            NodeKind::Aggregate {
                op,
                result,
                over,
                group_by,
                inner,
            } => write!(
                f,
                "{result} <- {op} {}; {} {inner}",
                over.as_deref().unwrap_or("*"),
                group_by.join(", ")
            ),
            NodeKind::Fill {
                inner,
                keys,
                result,
                default,
            } => write!(f, "FILL({inner}, {keys}, {result} := {default})"),
        }
    }
}
