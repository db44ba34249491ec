//! Protocol signature and policy formulas.
//!
//! Variable names used throughout: `rn` reporting node, `s` subnet, `sg`
//! signer, `h` block hash, `n` proposal count, `m` mean count, `v` variance.

use serde::{Deserialize, Serialize};
use tmon_formula::{AggOp, CmpOp, Expr, Interval, Term};
use tmon_schemas::{Signature, Value, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyParams {
    /// Span over which block proposals are counted.
    pub anomaly_window_secs: u64,
    /// A signer is anomalous when `(n - mean)^2 > factor * variance`.
    pub anomaly_threshold_factor: f64,
    /// A moved proposal must be delivered within this many seconds.
    pub finalization_deadline_secs: u64,
}

impl Default for PolicyParams {
    fn default() -> Self {
        Self {
            anomaly_window_secs: 86_400,
            anomaly_threshold_factor: 9.0,
            finalization_deadline_secs: 600,
        }
    }
}

pub fn signature() -> Signature {
    use ValueType::{Bytes, Principal};
    Signature::new()
        .with_relation("node_added", &[("node", Principal), ("subnet", Principal)])
        .with_relation(
            "block_proposed",
            &[
                ("reporting_node", Principal),
                ("subnet", Principal),
                ("signer", Principal),
                ("block_hash", Bytes),
            ],
        )
        .with_relation(
            "proposal_moved",
            &[
                ("reporting_node", Principal),
                ("subnet", Principal),
                ("block_hash", Bytes),
            ],
        )
        .with_relation(
            "batch_delivered",
            &[
                ("reporting_node", Principal),
                ("subnet", Principal),
                ("block_hash", Bytes),
            ],
        )
}

/// `(rn, s, sg)`: reporting node and signer both ever joined subnet `s`.
pub fn relevant() -> Expr {
    Expr::once(Interval::unbounded(0), Expr::pred("node_added", &["rn", "s"])).and(Expr::once(
        Interval::unbounded(0),
        Expr::pred("node_added", &["sg", "s"]),
    ))
}

/// `(rn, s, sg, n)`: signer `sg` proposed `n` distinct blocks seen by `rn`
/// in the window. Relevant signers without proposals get `n = 0`.
pub fn num_created_one_day(p: &PolicyParams) -> Expr {
    let proposed = Expr::once(
        Interval::bounded(0, p.anomaly_window_secs),
        Expr::pred("block_proposed", &["rn", "s", "sg", "h"]),
    )
    .and(relevant());
    Expr::fill(
        Expr::aggregate(AggOp::Cnt, "n", "h", &["rn", "s", "sg"], proposed),
        relevant(),
        "n",
        Value::int(0),
    )
}

/// `(rn, s, m)`: mean proposal count per signer.
pub fn mean_proposals(p: &PolicyParams) -> Expr {
    Expr::aggregate(AggOp::Avg, "m", "n", &["rn", "s"], num_created_one_day(p))
}

fn squared_deviation() -> Term {
    let dev = Term::var("n").sub(Term::var("m"));
    dev.clone().mul(dev)
}

/// `(rn, s, v)`: population variance of the proposal counts.
pub fn variance_proposals(p: &PolicyParams) -> Expr {
    let squared = Expr::exists(
        &["n", "m"],
        num_created_one_day(p)
            .and(mean_proposals(p))
            .and(Expr::eq(Term::var("d"), squared_deviation())),
    );
    let sum_sq = Expr::aggregate(AggOp::Sum, "ss", "d", &["rn", "s"], squared);
    let signers = Expr::aggregate(AggOp::Cnt, "c", "sg", &["rn", "s"], num_created_one_day(p));
    Expr::exists(
        &["ss", "c"],
        sum_sq
            .and(signers)
            .and(Expr::eq(Term::var("v"), Term::var("ss").div(Term::var("c")))),
    )
}

/// `(rn, s, sg, n)`: signer whose proposal count deviates from the subnet
/// mean by more than the threshold.
pub fn anomaly(p: &PolicyParams) -> Expr {
    Expr::exists(
        &["m", "v"],
        num_created_one_day(p)
            .and(mean_proposals(p))
            .and(variance_proposals(p))
            .and(Expr::cmp(
                CmpOp::Gt,
                squared_deviation(),
                Term::float(p.anomaly_threshold_factor).mul(Term::var("v")),
            )),
    )
}

/// Some signer somewhere is anomalous.
pub fn anomaly_any(p: &PolicyParams) -> Expr {
    Expr::exists(&["rn", "s", "sg", "n"], anomaly(p))
}

/// `(rn, s, h)`: proposal moved but its batch not delivered within the deadline.
pub fn finalization_latency(p: &PolicyParams) -> Expr {
    Expr::pred("proposal_moved", &["rn", "s", "h"]).and_not(Expr::eventually(
        Interval::bounded(0, p.finalization_deadline_secs),
        Expr::pred("batch_delivered", &["rn", "s", "h"]),
    ))
}
