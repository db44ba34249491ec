//! tmon-runtime
//!
//! The online monitor: one monotone fact stream, many rules.
//!
//! Architectural decisions:
//! - Facts are grouped into time points by timestamp and sealed by the next
//!   timestamp, the input watermark, or `finish`.
//! - Late facts are rejected, never buffered or reordered.
//! - Rules are independent; each sealed time point is fanned out to them on
//!   the rayon pool and results are routed back in handle order, so output
//!   is identical with or without parallelism.
//! - Verdicts leave the monitor only through the outbox (`take_verdicts`) or a
//!   [`VerdictSink`].

mod monitor;
mod rule;
mod trace;
mod watermark;

pub use monitor::{Monitor, MonitorSettings};
pub use rule::{
    CollectingSink, LifecycleError, Outcome, RuleHandle, RuleState, RuleStats, RuleVerdict,
    VerdictSink,
};
pub use trace::{load_trace, parse_trace_line, replay, ReplaySummary, TraceRecord};
pub use watermark::{FactFreshness, InputWatermark};
