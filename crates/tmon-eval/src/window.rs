//! Per-node retained state of one rule.
//!
//! Every stateful node owns exactly one slot in the [`WindowStore`], addressed
//! by its `NodeId`. Slots are written only while their node is evaluated, so
//! the formula tree itself stays immutable.
//!
//! # Invariants
//! - A `Once[a,b]` slot never keeps a table derived before `now - b`.
//! - An `Eventually[a,b]` slot keeps one obligation per time point whose
//!   deadline `t + b` the watermark has not yet passed.
//! - A binary slot only buffers results its sibling has not produced yet.

use crate::table::Table;
use std::collections::{BTreeSet, VecDeque};
use tmon_formula::{AndMode, Formula, Interval, Node, NodeId, NodeKind, Var};
use tmon_schemas::{Ts, TS_END};

/// Result of one node for one time point.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub index: u64,
    pub ts: Ts,
    pub table: Table,
}

/// Maximum rows retained by any single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionLimit {
    pub max_rows_per_node: usize,
}

impl Default for RetentionLimit {
    fn default() -> Self {
        Self {
            max_rows_per_node: 1_000_000,
        }
    }
}

/// Results of two operands, aligned by time point index.
#[derive(Debug, Default)]
pub(crate) struct BinaryBuffer {
    left: VecDeque<Step>,
    right: VecDeque<Step>,
}

impl BinaryBuffer {
    pub(crate) fn push(&mut self, left: Vec<Step>, right: Vec<Step>) -> Vec<(Step, Step)> {
        self.left.extend(left);
        self.right.extend(right);
        let mut ready = Vec::new();
        while !self.left.is_empty() && !self.right.is_empty() {
            if let (Some(l), Some(r)) = (self.left.pop_front(), self.right.pop_front()) {
                ready.push((l, r));
            }
        }
        ready
    }

    fn retained_rows(&self) -> usize {
        self.left
            .iter()
            .chain(self.right.iter())
            .map(|s| s.table.len())
            .sum()
    }

    /// Empty steps stay buffered; they still pair with the sibling.
    fn evict(&mut self, n: usize) -> usize {
        evict_from(self.left.iter_mut().chain(self.right.iter_mut()).map(|s| &mut s.table), n)
    }
}

/// Evict up to `n` rows, visiting tables oldest first.
fn evict_from<'a>(tables: impl Iterator<Item = &'a mut Table>, n: usize) -> usize {
    let mut evicted = 0;
    for table in tables {
        if evicted == n {
            break;
        }
        evicted += table.evict_oldest(n - evicted);
    }
    evicted
}

/// Sliding past window.
///
/// `pending` holds operand tables that are not yet `a` old; `window` those
/// inside `[now - b, now - a]`. With `b = ∞` eligible tables are folded into
/// `accumulated` instead, keeping the latest derivation per assignment.
///
/// `unstepped` lists sealed time points the operand has not answered yet. No
/// later step can be older than its front, or than the watermark when empty,
/// which is what lets [`OnceWindow::purge`] expire entries between steps.
#[derive(Debug)]
pub(crate) struct OnceWindow {
    interval: Interval,
    pending: VecDeque<(Ts, Table)>,
    window: VecDeque<(Ts, Table)>,
    accumulated: Table,
    unstepped: VecDeque<(u64, Ts)>,
}

impl OnceWindow {
    fn new(interval: Interval, vars: &[Var]) -> Self {
        Self {
            interval,
            pending: VecDeque::new(),
            window: VecDeque::new(),
            accumulated: Table::empty(vars.to_vec()),
            unstepped: VecDeque::new(),
        }
    }

    pub(crate) fn seal(&mut self, index: u64, ts: Ts) {
        self.unstepped.push_back((index, ts));
    }

    pub(crate) fn step(&mut self, step: Step) -> Step {
        let now = step.ts;
        if self.unstepped.front().is_some_and(|(i, _)| *i == step.index) {
            self.unstepped.pop_front();
        }
        if !step.table.is_empty() {
            self.pending.push_back((now, step.table));
        }
        self.slide(now);

        let mut out = self.accumulated.clone();
        for (_, table) in &self.window {
            out.union_latest(table);
        }
        Step {
            index: step.index,
            ts: now,
            table: out,
        }
    }

    /// Expire what no future step can see once the watermark is at `watermark`.
    pub(crate) fn purge(&mut self, watermark: Ts) {
        let bound = self.unstepped.front().map_or(watermark, |(_, ts)| (*ts).min(watermark));
        self.slide(bound);
    }

    /// Promote tables at least `a` old at `now`; drop those more than `b` old.
    fn slide(&mut self, now: Ts) {
        while self
            .pending
            .front()
            .is_some_and(|(ts, _)| now.saturating_sub(*ts) >= self.interval.lo)
        {
            let Some((ts, table)) = self.pending.pop_front() else {
                break;
            };
            match self.interval.hi {
                Some(_) => self.window.push_back((ts, table)),
                None => self.accumulated.union_latest(&table),
            }
        }

        if let Some(hi) = self.interval.hi {
            while self.window.front().is_some_and(|(ts, _)| now.saturating_sub(*ts) > hi) {
                self.window.pop_front();
            }
        }
    }

    fn retained_rows(&self) -> usize {
        self.accumulated.len()
            + self
                .pending
                .iter()
                .chain(self.window.iter())
                .map(|(_, t)| t.len())
                .sum::<usize>()
    }

    fn evict(&mut self, n: usize) -> usize {
        let tables = self
            .window
            .iter_mut()
            .map(|(_, t)| t)
            .chain(std::iter::once(&mut self.accumulated))
            .chain(self.pending.iter_mut().map(|(_, t)| t));
        let evicted = evict_from(tables, n);
        self.window.retain(|(_, t)| !t.is_empty());
        self.pending.retain(|(_, t)| !t.is_empty());
        evicted
    }
}

#[derive(Debug)]
struct Obligation {
    index: u64,
    ts: Ts,
    found: Table,
}

/// Pending future obligations.
///
/// Every sealed time point opens one obligation. Operand results discharge
/// assignments into it (earliest witness wins). It is released once the
/// watermark has passed its deadline and every time point up to the deadline
/// has been seen by the operand.
#[derive(Debug)]
pub(crate) struct EventuallyWindow {
    interval: Interval,
    obligations: VecDeque<Obligation>,
    /// Sealed time points the operand has not produced a result for yet.
    awaiting: VecDeque<(u64, Ts)>,
}

impl EventuallyWindow {
    fn new(interval: Interval) -> Self {
        Self {
            interval,
            obligations: VecDeque::new(),
            awaiting: VecDeque::new(),
        }
    }

    fn deadline(&self, ts: Ts) -> Ts {
        ts.saturating_add(self.interval.hi.unwrap_or(0))
    }

    pub(crate) fn open(&mut self, index: u64, ts: Ts, vars: &[Var]) {
        self.obligations.push_back(Obligation {
            index,
            ts,
            found: Table::empty(vars.to_vec()),
        });
        self.awaiting.push_back((index, ts));
    }

    pub(crate) fn observe(&mut self, step: &Step) {
        if self.awaiting.front().is_some_and(|(i, _)| *i == step.index) {
            self.awaiting.pop_front();
        }
        if step.table.is_empty() {
            return;
        }
        for ob in self.obligations.iter_mut() {
            if ob.index > step.index {
                break;
            }
            if self.interval.contains(step.ts - ob.ts) {
                ob.found.union_earliest(&step.table);
            }
        }
    }

    pub(crate) fn resolve(&mut self, watermark: Ts) -> Vec<Step> {
        let mut out = Vec::new();
        while let Some(front) = self.obligations.front() {
            let deadline = self.deadline(front.ts);
            let passed = watermark > deadline || watermark == TS_END;
            let operand_done = self.awaiting.front().map_or(true, |(_, ts)| *ts > deadline);
            if !(passed && operand_done) {
                break;
            }
            let Some(ob) = self.obligations.pop_front() else {
                break;
            };
            out.push(Step {
                index: ob.index,
                ts: ob.ts,
                table: ob.found,
            });
        }
        out
    }

    fn retained_rows(&self) -> usize {
        self.obligations.iter().map(|o| o.found.len()).sum()
    }

    fn pending(&self) -> usize {
        self.obligations.len()
    }

    fn evict(&mut self, n: usize) -> usize {
        evict_from(self.obligations.iter_mut().map(|o| &mut o.found), n)
    }
}

#[derive(Debug)]
pub(crate) enum Slot {
    Stateless,
    Binary(BinaryBuffer),
    Once(OnceWindow),
    Eventually(EventuallyWindow),
}

impl Slot {
    fn retained_rows(&self) -> usize {
        match self {
            Slot::Stateless => 0,
            Slot::Binary(b) => b.retained_rows(),
            Slot::Once(w) => w.retained_rows(),
            Slot::Eventually(w) => w.retained_rows(),
        }
    }

    fn evict(&mut self, n: usize) -> usize {
        match self {
            Slot::Stateless => 0,
            Slot::Binary(b) => b.evict(n),
            Slot::Once(w) => w.evict(n),
            Slot::Eventually(w) => w.evict(n),
        }
    }
}

/// Retained state of every node of one formula.
#[derive(Debug)]
pub struct WindowStore {
    slots: Vec<Slot>,
    limit: RetentionLimit,
    degraded: BTreeSet<NodeId>,
    newly_degraded: Vec<NodeId>,
}

impl WindowStore {
    pub fn new(formula: &Formula, limit: RetentionLimit) -> Self {
        let mut slots = Vec::with_capacity(formula.node_count());
        slots.resize_with(formula.node_count(), || Slot::Stateless);
        allocate(formula.root(), &mut slots);
        Self {
            slots,
            limit,
            degraded: BTreeSet::new(),
            newly_degraded: Vec::new(),
        }
    }

    pub(crate) fn slot_mut(&mut self, id: NodeId) -> Option<&mut Slot> {
        self.slots.get_mut(id)
    }

    /// Apply the retention limit to one slot, evicting oldest rows first.
    pub(crate) fn enforce_limit(&mut self, id: NodeId) {
        let max = self.limit.max_rows_per_node;
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        let retained = slot.retained_rows();
        if retained <= max {
            return;
        }
        if slot.evict(retained - max) > 0 && self.degraded.insert(id) {
            self.newly_degraded.push(id);
        }
    }

    /// Expire `Once` entries no future time point can reach.
    pub(crate) fn expire(&mut self, watermark: Ts) {
        for slot in &mut self.slots {
            if let Slot::Once(w) = slot {
                w.purge(watermark);
            }
        }
    }

    pub fn retained_rows(&self) -> usize {
        self.slots.iter().map(Slot::retained_rows).sum()
    }

    /// Open future obligations across all `Eventually` nodes.
    pub fn pending_obligations(&self) -> usize {
        self.slots
            .iter()
            .map(|s| match s {
                Slot::Eventually(w) => w.pending(),
                _ => 0,
            })
            .sum()
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn degraded_nodes(&self) -> &BTreeSet<NodeId> {
        &self.degraded
    }

    pub(crate) fn take_newly_degraded(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.newly_degraded)
    }
}

fn allocate(node: &Node, slots: &mut [Slot]) {
    let slot = match &node.kind {
        NodeKind::And {
            mode: AndMode::Join | AndMode::AntiJoin,
            ..
        }
        | NodeKind::Or { .. }
        | NodeKind::Fill { .. } => Slot::Binary(BinaryBuffer::default()),
        NodeKind::Once { interval, .. } => Slot::Once(OnceWindow::new(*interval, &node.free_vars)),
        NodeKind::Eventually { interval, .. } => Slot::Eventually(EventuallyWindow::new(*interval)),
        _ => Slot::Stateless,
    };
    if let Some(s) = slots.get_mut(node.id) {
        *s = slot;
    }
    for child in node.children() {
        allocate(child, slots);
    }
}
