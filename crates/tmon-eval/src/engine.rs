use crate::aggregate::Aggregation;
use crate::table::Table;
use crate::window::{RetentionLimit, Slot, Step, WindowStore};
use std::sync::Arc;
use tmon_formula::{AndMode, AtomArg, CmpOp, Formula, Node, NodeId, NodeKind, Term, Var};
use tmon_schemas::{Database, Ts, Value};

/// Final result of a rule for one of its time points.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Rule-local time point index (0 is the first time point the rule saw).
    pub index: u64,
    pub ts: Ts,
    pub table: Table,
    /// Some node dropped retained rows before this verdict was produced.
    pub degraded: bool,
}

impl Verdict {
    /// For a closed formula: whether it holds at this time point.
    pub fn holds(&self) -> bool {
        !self.table.is_empty()
    }
}

/// What one evaluation pass sees: at most one newly sealed time point, and
/// the watermark after sealing it.
struct Tick<'a> {
    sealed: Option<(u64, Ts, &'a Database)>,
    watermark: Ts,
}

/// Incremental evaluator of one compiled formula.
///
/// Sealed time points are pushed in timestamp order; every push or watermark
/// advance runs one bottom-up pass over the formula and returns the verdicts
/// that became final, in index order. A verdict is never revised.
#[derive(Debug)]
pub struct RuleEngine {
    formula: Arc<Formula>,
    store: WindowStore,
    sealed: u64,
    emitted: u64,
    watermark: Ts,
}

impl RuleEngine {
    pub fn new(formula: Arc<Formula>, limit: RetentionLimit) -> Self {
        let store = WindowStore::new(&formula, limit);
        Self {
            formula,
            store,
            sealed: 0,
            emitted: 0,
            watermark: 0,
        }
    }

    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    /// Evaluate a newly sealed time point. `watermark` must exceed `ts`.
    pub fn push(&mut self, ts: Ts, db: &Database, watermark: Ts) -> Vec<Verdict> {
        let index = self.sealed;
        self.sealed += 1;
        self.watermark = self.watermark.max(watermark);
        let tick = Tick {
            sealed: Some((index, ts, db)),
            watermark: self.watermark,
        };
        self.run(&tick)
    }

    /// Advance the watermark without a new time point. Past windows expire;
    /// only future obligations can become final here.
    pub fn advance(&mut self, watermark: Ts) -> Vec<Verdict> {
        if watermark <= self.watermark {
            return Vec::new();
        }
        self.watermark = watermark;
        self.store.expire(watermark);
        if self.store.pending_obligations() == 0 {
            return Vec::new();
        }
        let tick = Tick {
            sealed: None,
            watermark,
        };
        self.run(&tick)
    }

    fn run(&mut self, tick: &Tick<'_>) -> Vec<Verdict> {
        let formula = Arc::clone(&self.formula);
        let steps = eval(formula.root(), &mut self.store, tick);
        let degraded = self.store.is_degraded();
        self.emitted += steps.len() as u64;
        steps
            .into_iter()
            .map(|s| Verdict {
                index: s.index,
                ts: s.ts,
                table: s.table,
                degraded,
            })
            .collect()
    }

    pub fn watermark(&self) -> Ts {
        self.watermark
    }

    pub fn sealed(&self) -> u64 {
        self.sealed
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Time points sealed but not yet answered.
    pub fn pending(&self) -> u64 {
        self.sealed - self.emitted
    }

    pub fn retained_rows(&self) -> usize {
        self.store.retained_rows()
    }

    pub fn is_degraded(&self) -> bool {
        self.store.is_degraded()
    }

    /// Nodes that crossed the retention limit since the last call.
    pub fn take_newly_degraded(&mut self) -> Vec<NodeId> {
        self.store.take_newly_degraded()
    }
}

fn eval(node: &Node, store: &mut WindowStore, tick: &Tick<'_>) -> Vec<Step> {
    match &node.kind {
        NodeKind::Atom { relation, args } => leaf(tick, |db, ts| atom(node, relation, args, db, ts)),
        NodeKind::Compare { op, left, right } => leaf(tick, |_, ts| constant(node, *op, left, right, ts)),
        NodeKind::Not { inner } => eval(inner, store, tick)
            .into_iter()
            .map(|s| {
                let table = if s.table.is_empty() {
                    Table::unit(s.ts)
                } else {
                    Table::empty(Vec::new())
                };
                Step { table, ..s }
            })
            .collect(),
        NodeKind::And { mode, left, right } => match mode {
            AndMode::Join => binary(node.id, store, tick, left, right, |l, r| l.join(r)),
            AndMode::AntiJoin => {
                let negated = match &right.kind {
                    NodeKind::Not { inner } => inner.as_ref(),
                    _ => right.as_ref(),
                };
                binary(node.id, store, tick, left, negated, |l, r| l.anti_join(r))
            }
            AndMode::Filter => {
                let NodeKind::Compare { op, left: lt, right: rt } = &right.kind else {
                    return eval(left, store, tick);
                };
                map(eval(left, store, tick), |t| filter(t, *op, lt, rt))
            }
            AndMode::Assign => {
                let NodeKind::Compare { left: lt, right: rt, .. } = &right.kind else {
                    return eval(left, store, tick);
                };
                let var = lt.as_var().unwrap_or_default();
                map(eval(left, store, tick), |t| assign(t, var, rt, &node.free_vars))
            }
        },
        NodeKind::Or { left, right } => binary(node.id, store, tick, left, right, |l, r| {
            let mut out = l.clone();
            out.union_latest(r);
            out
        }),
        NodeKind::Exists { inner, .. } => {
            map(eval(inner, store, tick), |t| t.project(&node.free_vars))
        }
        NodeKind::Once { inner, .. } => {
            let steps = eval(inner, store, tick);
            let mut out = Vec::with_capacity(steps.len());
            if let Some(Slot::Once(window)) = store.slot_mut(node.id) {
                if let Some((index, ts, _)) = tick.sealed {
                    window.seal(index, ts);
                }
                for s in steps {
                    out.push(window.step(s));
                }
                window.purge(tick.watermark);
            }
            store.enforce_limit(node.id);
            out
        }
        NodeKind::Eventually { inner, .. } => {
            let steps = eval(inner, store, tick);
            let mut out = Vec::new();
            if let Some(Slot::Eventually(window)) = store.slot_mut(node.id) {
                if let Some((index, ts, _)) = tick.sealed {
                    window.open(index, ts, &node.free_vars);
                }
                for s in &steps {
                    window.observe(s);
                }
                out = window.resolve(tick.watermark);
            }
            store.enforce_limit(node.id);
            out
        }
        NodeKind::Aggregate {
            op,
            result,
            over,
            group_by,
            inner,
        } => {
            let agg = Aggregation {
                op: *op,
                result,
                over: over.as_ref(),
                group_by,
                out_vars: &node.free_vars,
                result_type: node
                    .var_types
                    .get(result)
                    .copied()
                    .unwrap_or(tmon_schemas::ValueType::Int),
            };
            eval(inner, store, tick)
                .into_iter()
                .map(|s| Step {
                    table: agg.apply(&s.table, s.ts),
                    ..s
                })
                .collect()
        }
        NodeKind::Fill {
            inner,
            keys,
            result,
            default,
        } => binary(node.id, store, tick, inner, keys, |body, keys| {
            fill(body, keys, result, default)
        }),
    }
}

fn leaf(tick: &Tick<'_>, build: impl FnOnce(&Database, Ts) -> Table) -> Vec<Step> {
    match tick.sealed {
        Some((index, ts, db)) => vec![Step {
            index,
            ts,
            table: build(db, ts),
        }],
        None => Vec::new(),
    }
}

fn map(steps: Vec<Step>, f: impl Fn(&Table) -> Table) -> Vec<Step> {
    steps
        .into_iter()
        .map(|s| Step {
            table: f(&s.table),
            ..s
        })
        .collect()
}

fn binary(
    id: NodeId,
    store: &mut WindowStore,
    tick: &Tick<'_>,
    left: &Node,
    right: &Node,
    combine: impl Fn(&Table, &Table) -> Table,
) -> Vec<Step> {
    let l = eval(left, store, tick);
    let r = eval(right, store, tick);
    let mut out = Vec::new();
    if let Some(Slot::Binary(buffer)) = store.slot_mut(id) {
        for (ls, rs) in buffer.push(l, r) {
            out.push(Step {
                index: ls.index,
                ts: ls.ts,
                table: combine(&ls.table, &rs.table),
            });
        }
    }
    store.enforce_limit(id);
    out
}

fn atom(node: &Node, relation: &str, args: &[AtomArg], db: &Database, ts: Ts) -> Table {
    let mut out = Table::empty(node.free_vars.clone());
    'tuples: for tuple in db.tuples(relation) {
        let mut row: Vec<Option<Value>> = vec![None; node.free_vars.len()];
        for (arg, value) in args.iter().zip(tuple) {
            match arg {
                AtomArg::Const(c) if c != value => continue 'tuples,
                AtomArg::Const(_) => {}
                AtomArg::Column(i) => {
                    if let Some(seen) = &row[*i] {
                        if seen != value {
                            continue 'tuples;
                        }
                    } else {
                        row[*i] = Some(value.clone());
                    }
                }
            }
        }
        if let Some(row) = row.into_iter().collect::<Option<Vec<Value>>>() {
            out.insert_latest(row, ts);
        }
    }
    out
}

/// Free-standing comparison: closed, or `x = closed-term`.
fn constant(node: &Node, op: CmpOp, left: &Term, right: &Term, ts: Ts) -> Table {
    if node.is_closed() {
        let holds = match (left.eval(&unbound), right.eval(&unbound)) {
            (Some(l), Some(r)) => op.holds(&l, &r),
            _ => false,
        };
        return if holds {
            Table::unit(ts)
        } else {
            Table::empty(Vec::new())
        };
    }
    let mut out = Table::empty(node.free_vars.clone());
    if let Some(v) = right.eval(&unbound) {
        out.insert_latest(vec![v], ts);
    }
    out
}

fn unbound(_: &str) -> Option<&'static Value> {
    None
}

fn filter(input: &Table, op: CmpOp, left: &Term, right: &Term) -> Table {
    let mut out = input.clone();
    out.retain(|row, _| {
        let lookup = input.binder(row);
        match (left.eval(&lookup), right.eval(&lookup)) {
            (Some(l), Some(r)) => op.holds(&l, &r),
            _ => false,
        }
    });
    out
}

fn assign(input: &Table, var: &str, term: &Term, out_vars: &[Var]) -> Table {
    let at = out_vars
        .binary_search_by(|v| v.as_str().cmp(var))
        .unwrap_or_else(|i| i);
    let mut out = Table::empty(out_vars.to_vec());
    for (row, ts) in input.rows() {
        let lookup = input.binder(row);
        let Some(value) = term.eval(&lookup) else {
            continue;
        };
        let mut extended = row.clone();
        extended.insert(at.min(extended.len()), value);
        out.insert_latest(extended, ts);
    }
    out
}

/// `body` plus `result := default` for every key row `body` does not cover.
fn fill(body: &Table, keys: &Table, result: &str, default: &Value) -> Table {
    let key_vars = keys.vars().to_vec();
    let covered = body.project(&key_vars);
    let at = body
        .vars()
        .binary_search_by(|v| v.as_str().cmp(result))
        .unwrap_or_else(|i| i);
    let mut out = body.clone();
    for (key, ts) in keys.rows() {
        if covered.contains(key) {
            continue;
        }
        let mut row = key.clone();
        row.insert(at.min(row.len()), default.clone());
        out.insert_latest(row, ts);
    }
    out
}
