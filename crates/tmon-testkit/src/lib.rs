//! tmon-testkit
//!
//! Test support for the monitor: a brute-force reference evaluator over a
//! complete finite trace, and deterministic trace generators.

mod generate;
mod oracle;

pub use generate::{facts_of, random_trace, small_signature, SplitMix64, TraceShape};
pub use oracle::{Oracle, Relation};
