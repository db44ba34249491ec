//! Reference evaluator.
//!
//! Evaluates a compiled formula directly from its semantics over a complete
//! trace: temporal operators scan the trace, nothing is incremental and
//! nothing is evicted. Results are memoised per (node, time point). Slow by
//! construction; only meant to check the incremental engine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tmon_formula::{AggOp, AndMode, AtomArg, CmpOp, Formula, Node, NodeId, NodeKind, Term, Var};
use tmon_schemas::{TimePoint, Tuple, Value, ValueType};

/// Rows of a node at one time point, columns in the node's free-variable order.
pub type Relation = BTreeSet<Tuple>;

pub struct Oracle<'a> {
    formula: &'a Formula,
    trace: &'a [TimePoint],
    memo: HashMap<(NodeId, usize), Relation>,
}

impl<'a> Oracle<'a> {
    pub fn new(formula: &'a Formula, trace: &'a [TimePoint]) -> Self {
        Self {
            formula,
            trace,
            memo: HashMap::new(),
        }
    }

    /// Satisfying rows of the whole formula at time point `i`.
    pub fn eval_at(&mut self, i: usize) -> Relation {
        let root = self.formula.root();
        self.eval(root, i)
    }

    pub fn eval_all(&mut self) -> Vec<Relation> {
        (0..self.trace.len()).map(|i| self.eval_at(i)).collect()
    }

    fn eval(&mut self, node: &'a Node, i: usize) -> Relation {
        if let Some(hit) = self.memo.get(&(node.id, i)) {
            return hit.clone();
        }
        let out = self.compute(node, i);
        self.memo.insert((node.id, i), out.clone());
        out
    }

    fn compute(&mut self, node: &'a Node, i: usize) -> Relation {
        match &node.kind {
            NodeKind::Atom { relation, args } => self.atom(node, relation, args, i),
            NodeKind::Compare { op, left, right } => {
                if node.is_closed() {
                    truth(compare(*op, left, right, &[], &Vec::new()))
                } else {
                    right.eval(&no_vars).map(|v| vec![v]).into_iter().collect()
                }
            }
            NodeKind::Not { inner } => truth(self.eval(inner, i).is_empty()),
            NodeKind::And { mode, left, right } => {
                let l = self.eval(left, i);
                match (mode, &right.kind) {
                    (AndMode::AntiJoin, NodeKind::Not { inner }) => {
                        let negated = self.eval(inner, i);
                        l.into_iter()
                            .filter(|row| {
                                !negated.contains(&project(&left.free_vars, row, &inner.free_vars))
                            })
                            .collect()
                    }
                    (AndMode::Filter, NodeKind::Compare { op, left: lt, right: rt }) => l
                        .into_iter()
                        .filter(|row| compare(*op, lt, rt, &left.free_vars, row))
                        .collect(),
                    (AndMode::Assign, NodeKind::Compare { left: lt, right: rt, .. }) => {
                        let var = lt.as_var().unwrap_or_default();
                        l.into_iter()
                            .filter_map(|row| {
                                let value = rt.eval(&lookup(&left.free_vars, &row))?;
                                let mut vars = left.free_vars.clone();
                                vars.push(var.to_string());
                                let mut extended = row.clone();
                                extended.push(value);
                                Some(project(&vars, &extended, &node.free_vars))
                            })
                            .collect()
                    }
                    _ => {
                        let r = self.eval(right, i);
                        join(&left.free_vars, &l, &right.free_vars, &r, &node.free_vars)
                    }
                }
            }
            NodeKind::Or { left, right } => {
                let mut out = self.eval(left, i);
                out.extend(self.eval(right, i));
                out
            }
            NodeKind::Exists { inner, .. } => self
                .eval(inner, i)
                .iter()
                .map(|row| project(&inner.free_vars, row, &node.free_vars))
                .collect(),
            NodeKind::Once { interval, inner } => {
                let now = self.trace[i].ts;
                let mut out = Relation::new();
                for j in (0..=i).rev() {
                    let d = now - self.trace[j].ts;
                    if interval.hi.is_some_and(|hi| d > hi) {
                        break;
                    }
                    if interval.contains(d) {
                        out.extend(self.eval(inner, j));
                    }
                }
                out
            }
            NodeKind::Eventually { interval, inner } => {
                let now = self.trace[i].ts;
                let mut out = Relation::new();
                for j in i..self.trace.len() {
                    let d = self.trace[j].ts - now;
                    if interval.hi.is_some_and(|hi| d > hi) {
                        break;
                    }
                    if interval.contains(d) {
                        out.extend(self.eval(inner, j));
                    }
                }
                out
            }
            NodeKind::Aggregate {
                op,
                result,
                over,
                group_by,
                inner,
            } => {
                let rows = self.eval(inner, i);
                let result_type = node.var_types.get(result).copied().unwrap_or(ValueType::Int);
                aggregate(*op, result, over.as_ref(), group_by, result_type, inner, &rows, node)
            }
            NodeKind::Fill {
                inner,
                keys,
                result,
                default,
            } => {
                let mut out = self.eval(inner, i);
                let covered: Relation = out
                    .iter()
                    .map(|row| project(&inner.free_vars, row, &keys.free_vars))
                    .collect();
                for key in self.eval(keys, i) {
                    if covered.contains(&key) {
                        continue;
                    }
                    let mut vars = keys.free_vars.clone();
                    vars.push(result.clone());
                    let mut row = key;
                    row.push(default.clone());
                    out.insert(project(&vars, &row, &node.free_vars));
                }
                out
            }
        }
    }

    fn atom(&self, node: &Node, relation: &str, args: &[AtomArg], i: usize) -> Relation {
        let mut out = Relation::new();
        for tuple in self.trace[i].db.tuples(relation) {
            let mut row: Vec<Option<Value>> = vec![None; node.free_vars.len()];
            let matches = args.iter().zip(tuple).all(|(arg, value)| match arg {
                AtomArg::Const(c) => c == value,
                AtomArg::Column(c) => match &row[*c] {
                    Some(seen) => seen == value,
                    None => {
                        row[*c] = Some(value.clone());
                        true
                    }
                },
            });
            if matches {
                out.extend(row.into_iter().collect::<Option<Tuple>>());
            }
        }
        out
    }
}

#[allow(clippy::too_many_arguments)]
fn aggregate(
    op: AggOp,
    result: &Var,
    over: Option<&Var>,
    group_by: &[Var],
    result_type: ValueType,
    inner: &Node,
    rows: &Relation,
    node: &Node,
) -> Relation {
    let group_vars: Vec<Var> = node.free_vars.iter().filter(|v| *v != result).cloned().collect();
    let mut groups: BTreeMap<Tuple, Vec<Value>> = BTreeMap::new();
    for row in rows {
        let key = project(&inner.free_vars, row, &group_vars);
        let value = match over {
            Some(v) => project(&inner.free_vars, row, std::slice::from_ref(v)).remove(0),
            None => Value::Int(1),
        };
        groups.entry(key).or_default().push(value);
    }

    let mut vars = group_vars.clone();
    vars.push(result.clone());
    let mut out = Relation::new();
    if groups.is_empty() && group_by.is_empty() {
        let zero = match (op, result_type) {
            (AggOp::Cnt, _) | (AggOp::Sum, ValueType::Int) => Some(Value::Int(0)),
            (AggOp::Sum, _) => Some(Value::Float(0.0)),
            _ => None,
        };
        out.extend(zero.map(|z| vec![z]));
        return out;
    }
    for (key, values) in groups {
        let value = match op {
            AggOp::Cnt => Some(Value::Int(values.len() as i64)),
            AggOp::Sum if result_type == ValueType::Int => values
                .iter()
                .try_fold(0i64, |acc, v| match v {
                    Value::Int(x) => acc.checked_add(*x),
                    _ => None,
                })
                .map(Value::Int),
            AggOp::Sum => float_sum(&values).map(Value::Float),
            AggOp::Avg => float_sum(&values).map(|s| Value::Float(s / values.len() as f64)),
            AggOp::Min => values.iter().min().cloned(),
            AggOp::Max => values.iter().max().cloned(),
        };
        if let Some(value) = value {
            let mut row = key;
            row.push(value);
            out.insert(project(&vars, &row, &node.free_vars));
        }
    }
    out
}

fn float_sum(values: &[Value]) -> Option<f64> {
    values.iter().try_fold(0.0, |acc, v| v.as_f64().map(|x| acc + x))
}

fn truth(holds: bool) -> Relation {
    if holds {
        Relation::from([Vec::new()])
    } else {
        Relation::new()
    }
}

fn no_vars(_: &str) -> Option<&'static Value> {
    None
}

fn lookup<'r>(vars: &'r [Var], row: &'r Tuple) -> impl Fn(&str) -> Option<&'r Value> + 'r {
    move |name| vars.iter().position(|v| v == name).map(|i| &row[i])
}

fn compare(op: CmpOp, left: &Term, right: &Term, vars: &[Var], row: &Tuple) -> bool {
    let env = lookup(vars, row);
    match (left.eval(&env), right.eval(&env)) {
        (Some(l), Some(r)) => op.holds(&l, &r),
        _ => false,
    }
}

/// Reorder `row` (columns `from`) to the columns `to`; every `to` var must be in `from`.
fn project(from: &[Var], row: &Tuple, to: &[Var]) -> Tuple {
    to.iter()
        .filter_map(|v| from.iter().position(|f| f == v).map(|i| row[i].clone()))
        .collect()
}

fn join(lv: &[Var], l: &Relation, rv: &[Var], r: &Relation, out: &[Var]) -> Relation {
    let shared: Vec<Var> = lv.iter().filter(|v| rv.contains(v)).cloned().collect();
    let mut result = Relation::new();
    for lrow in l {
        let lkey = project(lv, lrow, &shared);
        for rrow in r {
            if project(rv, rrow, &shared) != lkey {
                continue;
            }
            let mut vars = lv.to_vec();
            let mut row = lrow.clone();
            for (v, value) in rv.iter().zip(rrow) {
                if !lv.contains(v) {
                    vars.push(v.clone());
                    row.push(value.clone());
                }
            }
            result.insert(project(&vars, &row, out));
        }
    }
    result
}
