use crate::rule::{
    LifecycleError, Outcome, RuleHandle, RuleState, RuleStats, RuleVerdict, VerdictSink,
};
use crate::watermark::{FactFreshness, InputWatermark};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tmon_eval::{RetentionLimit, RuleEngine, Verdict};
use tmon_formula::{Expr, Formula, FormulaError, NodeId};
use tmon_schemas::{Database, Fact, InputError, Signature, Ts, TS_END};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub retention: RetentionLimit,
    /// Fan each time point out to rules on the rayon pool.
    pub parallel_rules: bool,
    /// `flush` forwards only verdicts that hold.
    pub violations_only: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            retention: RetentionLimit::default(),
            parallel_rules: true,
            violations_only: false,
        }
    }
}

struct RuleSlot {
    name: String,
    state: RuleState,
    engine: Option<RuleEngine>,
    /// While draining: verdicts are kept only for rule-local indices below this.
    drain_cutoff: Option<u64>,
    sealed: u64,
    emitted: u64,
    degraded: bool,
}

impl RuleSlot {
    fn stats(&self, handle: RuleHandle) -> RuleStats {
        let (sealed, emitted, retained, degraded) = match &self.engine {
            Some(e) => (e.sealed(), self.emitted, e.retained_rows(), e.is_degraded()),
            None => (self.sealed, self.emitted, 0, self.degraded),
        };
        let owed = self.drain_cutoff.unwrap_or(sealed);
        RuleStats {
            handle,
            name: self.name.clone(),
            state: self.state,
            time_points_sealed: sealed,
            verdicts_emitted: emitted,
            pending: if self.state == RuleState::Closed {
                0
            } else {
                owed.saturating_sub(emitted)
            },
            retained_rows: retained,
            degraded,
        }
    }

    fn close(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.sealed = engine.sealed();
            self.degraded = engine.is_degraded();
        }
        self.state = RuleState::Closed;
        self.drain_cutoff = None;
    }
}

struct OpenTimePoint {
    ts: Ts,
    db: Database,
}

/// Online monitor: ingests one monotone fact stream and evaluates every
/// registered rule against it.
///
/// Facts sharing a timestamp form one time point. A time point is sealed
/// (handed to the rules) once a later fact arrives, the watermark passes it,
/// or the monitor finishes. Verdicts accumulate in an outbox until taken or
/// flushed, per rule in time point order.
pub struct Monitor {
    signature: Arc<Signature>,
    settings: MonitorSettings,
    watermark: InputWatermark,
    open: Option<OpenTimePoint>,
    rules: BTreeMap<RuleHandle, RuleSlot>,
    next_handle: u64,
    outbox: Vec<RuleVerdict>,
    time_points: u64,
    finished: bool,
}

impl Monitor {
    pub fn new(signature: Signature, settings: MonitorSettings) -> Self {
        Self {
            signature: Arc::new(signature),
            settings,
            watermark: InputWatermark::new(),
            open: None,
            rules: BTreeMap::new(),
            next_handle: 1,
            outbox: Vec::new(),
            time_points: 0,
            finished: false,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    // ---- rule registry -----------------------------------------------------

    /// Compile and activate a rule. A rule that fails compilation is never activated.
    pub fn register(&mut self, name: &str, expr: &Expr) -> Result<RuleHandle, FormulaError> {
        debug!(rule = name, state = %RuleState::Constructing, "rule/compile");
        let formula = Formula::compile(expr, &self.signature).map_err(|e| {
            warn!(rule = name, error = %e, "rule/rejected");
            e
        })?;
        Ok(self.register_compiled(name, Arc::new(formula)))
    }

    /// Activate an already compiled rule. The rule sees time points sealed from now on.
    pub fn register_compiled(&mut self, name: &str, formula: Arc<Formula>) -> RuleHandle {
        let handle = RuleHandle(self.next_handle);
        self.next_handle += 1;

        let closed = formula.is_closed();
        let horizon = formula.future_horizon();
        let mut slot = RuleSlot {
            name: name.to_string(),
            state: RuleState::Active,
            engine: Some(RuleEngine::new(formula, self.settings.retention)),
            drain_cutoff: None,
            sealed: 0,
            emitted: 0,
            degraded: false,
        };
        if self.finished {
            slot.close();
        }
        info!(rule = name, %handle, closed, horizon, state = %slot.state, "rule/registered");
        self.rules.insert(handle, slot);
        handle
    }

    /// Tear a rule down immediately. Pending obligations are dropped without verdicts.
    pub fn deregister(&mut self, handle: RuleHandle) -> Result<(), LifecycleError> {
        let slot = self
            .rules
            .get_mut(&handle)
            .ok_or(LifecycleError::UnknownRule(handle))?;
        if slot.state == RuleState::Closed {
            return Err(LifecycleError::RuleClosed(handle));
        }
        let dropped = slot.stats(handle).pending;
        slot.close();
        info!(rule = %slot.name, %handle, dropped, "rule/deregistered");
        Ok(())
    }

    /// Stop producing verdicts for new time points but let the ones already
    /// sealed run to their deadlines. The rule closes once they are all answered.
    pub fn drain(&mut self, handle: RuleHandle) -> Result<(), LifecycleError> {
        let slot = self
            .rules
            .get_mut(&handle)
            .ok_or(LifecycleError::UnknownRule(handle))?;
        match slot.state {
            RuleState::Closed => return Err(LifecycleError::RuleClosed(handle)),
            RuleState::Draining => return Ok(()),
            RuleState::Active | RuleState::Constructing => {}
        }
        let cutoff = slot.engine.as_ref().map_or(0, RuleEngine::sealed);
        slot.drain_cutoff = Some(cutoff);
        slot.state = RuleState::Draining;
        info!(rule = %slot.name, %handle, owed = cutoff.saturating_sub(slot.emitted), "rule/draining");
        if slot.emitted >= cutoff {
            slot.close();
            info!(rule = %slot.name, %handle, "rule/closed");
        }
        Ok(())
    }

    pub fn rule_state(&self, handle: RuleHandle) -> Option<RuleState> {
        self.rules.get(&handle).map(|s| s.state)
    }

    pub fn stats(&self, handle: RuleHandle) -> Option<RuleStats> {
        self.rules.get(&handle).map(|s| s.stats(handle))
    }

    pub fn all_stats(&self) -> Vec<RuleStats> {
        self.rules.iter().map(|(h, s)| s.stats(*h)).collect()
    }

    // ---- ingestion ---------------------------------------------------------

    /// Ingest one fact. Rejected facts are logged and leave all state untouched.
    pub fn submit(&mut self, fact: Fact) -> Result<(), InputError> {
        if let Err(e) = self.admit(&fact) {
            warn!(relation = %fact.relation, ts = fact.ts, error = %e, "fact/rejected");
            return Err(e);
        }
        self.watermark.accept(fact.ts);
        self.open_time_point(fact.ts);
        if let Some(open) = self.open.as_mut() {
            open.db.insert(fact.relation, fact.fields);
        }
        Ok(())
    }

    /// Open a (possibly empty) time point at `ts`.
    pub fn tick(&mut self, ts: Ts) -> Result<(), InputError> {
        self.admit_ts(ts)?;
        self.watermark.accept(ts);
        self.open_time_point(ts);
        Ok(())
    }

    /// Declare that no fact below `watermark` will arrive. Lower values are a no-op.
    pub fn advance_watermark(&mut self, watermark: Ts) {
        if self.finished || !self.watermark.advance_to(watermark) {
            return;
        }
        match self.open.take() {
            Some(open) if open.ts < watermark => self.seal(open, watermark),
            still_open => {
                self.open = still_open;
                self.fan_out(|engine| engine.advance(watermark));
            }
        }
    }

    /// The trace is complete: seal the open time point, answer every pending
    /// time point of every rule, and close all rules.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.watermark.advance_to(TS_END);
        match self.open.take() {
            Some(open) => self.seal(open, TS_END),
            None => self.fan_out(|engine| engine.advance(TS_END)),
        }
        for (handle, slot) in self.rules.iter_mut() {
            if slot.state != RuleState::Closed {
                slot.close();
                info!(rule = %slot.name, %handle, "rule/closed");
            }
        }
        self.finished = true;
        info!(time_points = self.time_points, "monitor/finished");
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn watermark(&self) -> Ts {
        self.watermark.current()
    }

    /// Time points sealed so far.
    pub fn time_points(&self) -> u64 {
        self.time_points
    }

    // ---- output ------------------------------------------------------------

    pub fn take_verdicts(&mut self) -> Vec<RuleVerdict> {
        std::mem::take(&mut self.outbox)
    }

    /// Forward buffered verdicts to `sink` in emission order. Returns how many
    /// were delivered.
    pub fn flush(&mut self, sink: &mut dyn VerdictSink) -> anyhow::Result<usize> {
        let mut delivered = 0;
        for verdict in self.take_verdicts() {
            if self.settings.violations_only && !verdict.holds() {
                continue;
            }
            sink.deliver(&verdict)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    // ---- internals ---------------------------------------------------------

    fn admit(&self, fact: &Fact) -> Result<(), InputError> {
        self.admit_ts(fact.ts)?;
        self.signature.check(fact)
    }

    fn admit_ts(&self, ts: Ts) -> Result<(), InputError> {
        if self.finished {
            return Err(InputError::MonitorClosed);
        }
        if ts == TS_END {
            return Err(InputError::ReservedTimestamp);
        }
        match self.watermark.check(ts) {
            FactFreshness::Fresh => Ok(()),
            FactFreshness::Late { watermark, got } => Err(InputError::OutOfOrderFact {
                ts: got,
                watermark,
            }),
        }
    }

    /// Make `ts` the open time point, sealing an older one first.
    fn open_time_point(&mut self, ts: Ts) {
        match self.open.take() {
            Some(open) if open.ts < ts => {
                self.seal(open, ts);
                self.open = Some(OpenTimePoint {
                    ts,
                    db: Database::new(),
                });
            }
            Some(open) => self.open = Some(open),
            None => {
                self.open = Some(OpenTimePoint {
                    ts,
                    db: Database::new(),
                })
            }
        }
    }

    fn seal(&mut self, open: OpenTimePoint, watermark: Ts) {
        self.time_points += 1;
        debug!(ts = open.ts, facts = open.db.len(), watermark, "timepoint/sealed");
        let OpenTimePoint { ts, db } = open;
        self.fan_out(|engine| engine.push(ts, &db, watermark));
    }

    /// Run `step` on every live rule, then route results in handle order.
    fn fan_out<F>(&mut self, step: F)
    where
        F: Fn(&mut RuleEngine) -> Vec<Verdict> + Sync + Send,
    {
        let run = |(handle, slot): (&RuleHandle, &mut RuleSlot)| {
            let Some(engine) = slot.engine.as_mut() else {
                return (*handle, Vec::new(), Vec::new());
            };
            let verdicts = step(engine);
            (*handle, verdicts, engine.take_newly_degraded())
        };

        let live = self.rules.iter_mut().filter(|(_, s)| s.engine.is_some());
        let results: Vec<(RuleHandle, Vec<Verdict>, Vec<NodeId>)> = if self.settings.parallel_rules {
            live.collect::<Vec<_>>().into_par_iter().map(run).collect()
        } else {
            live.map(run).collect()
        };

        for (handle, verdicts, degraded_nodes) in results {
            let Some(slot) = self.rules.get_mut(&handle) else {
                continue;
            };
            for node in degraded_nodes {
                warn!(rule = %slot.name, %handle, node, "rule/retention-limit-exceeded");
            }
            route(&mut self.outbox, handle, slot, verdicts);
        }
    }
}

fn route(outbox: &mut Vec<RuleVerdict>, handle: RuleHandle, slot: &mut RuleSlot, verdicts: Vec<Verdict>) {
    let closed = slot
        .engine
        .as_ref()
        .is_some_and(|e| e.formula().is_closed());
    for v in verdicts {
        if slot.drain_cutoff.is_some_and(|cut| v.index >= cut) {
            continue;
        }
        slot.emitted += 1;
        let outcome = if closed {
            Outcome::Boolean { holds: v.holds() }
        } else {
            Outcome::Assignments {
                rows: v.table.assignments(),
            }
        };
        trace!(rule = %slot.name, %handle, index = v.index, ts = v.ts, holds = v.holds(), "verdict/emitted");
        outbox.push(RuleVerdict {
            rule: handle,
            rule_name: slot.name.clone(),
            index: v.index,
            ts: v.ts,
            outcome,
            degraded: v.degraded,
        });
    }

    if let Some(cut) = slot.drain_cutoff {
        if slot.emitted >= cut {
            slot.close();
            info!(rule = %slot.name, %handle, "rule/closed");
        }
    }
}
