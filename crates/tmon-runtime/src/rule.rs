use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tmon_formula::Var;
use tmon_schemas::{Ts, Value};

/// Opaque id of a registered rule. Handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleHandle(pub u64);

impl fmt::Display for RuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// Rule lifecycle: `Constructing -> Active -> Draining -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    /// Formula is being compiled; the rule sees no input yet.
    Constructing,
    /// Consuming time points and emitting verdicts.
    Active,
    /// Still consuming time points, but only to finish verdicts for time
    /// points sealed before draining started.
    Draining,
    /// All retained state released.
    Closed,
}

impl fmt::Display for RuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleState::Constructing => "constructing",
            RuleState::Active => "active",
            RuleState::Draining => "draining",
            RuleState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Rejected lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    UnknownRule(RuleHandle),
    RuleClosed(RuleHandle),
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::UnknownRule(h) => write!(f, "unknown rule {h}"),
            LifecycleError::RuleClosed(h) => write!(f, "rule {h} is already closed"),
        }
    }
}

impl std::error::Error for LifecycleError {}

/// Verdict payload: a boolean for closed formulas, satisfying assignments otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Boolean { holds: bool },
    Assignments { rows: Vec<BTreeMap<Var, Value>> },
}

/// Final result of one rule at one of its time points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleVerdict {
    pub rule: RuleHandle,
    pub rule_name: String,
    /// Rule-local time point index.
    pub index: u64,
    pub ts: Ts,
    pub outcome: Outcome,
    /// Retention limit was hit somewhere in the rule; the verdict may miss rows.
    pub degraded: bool,
}

impl RuleVerdict {
    /// Boolean verdict holds, or at least one assignment satisfies the formula.
    pub fn holds(&self) -> bool {
        match &self.outcome {
            Outcome::Boolean { holds } => *holds,
            Outcome::Assignments { rows } => !rows.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleStats {
    pub handle: RuleHandle,
    pub name: String,
    pub state: RuleState,
    pub time_points_sealed: u64,
    pub verdicts_emitted: u64,
    /// Time points sealed but without a verdict yet.
    pub pending: u64,
    pub retained_rows: usize,
    pub degraded: bool,
}

/// Consumer of verdicts (alerting, reporting, a log file).
pub trait VerdictSink {
    fn deliver(&mut self, verdict: &RuleVerdict) -> anyhow::Result<()>;
}

/// Keeps every delivered verdict in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub verdicts: Vec<RuleVerdict>,
}

impl VerdictSink for CollectingSink {
    fn deliver(&mut self, verdict: &RuleVerdict) -> anyhow::Result<()> {
        self.verdicts.push(verdict.clone());
        Ok(())
    }
}
