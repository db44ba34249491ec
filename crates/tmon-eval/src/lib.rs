//! tmon-eval
//!
//! Incremental, watermark-driven evaluation of one compiled formula.
//!
//! Architectural decisions:
//! - The formula tree is read-only; all mutable state lives in a
//!   [`WindowStore`] slot per node id.
//! - Every node answers time points in index order. Binary nodes buffer the
//!   faster operand until the slower one catches up, so a pending future
//!   obligation never blocks ingestion of later time points.
//! - Retention is bounded by each temporal operator's interval; a per-node
//!   row limit evicts oldest rows and marks the rule degraded.
//!
//! Pure deterministic logic. No IO, no wall-clock.

mod aggregate;
mod engine;
mod table;
mod window;

pub use engine::{RuleEngine, Verdict};
pub use table::Table;
pub use window::{RetentionLimit, Step, WindowStore};
