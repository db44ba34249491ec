//! Finalization latency policy.
//!
//! GREEN when:
//! - A moved proposal delivered within the deadline is not reported.
//! - A moved proposal never delivered is reported for its time point once
//!   the trace finishes.
//! - A delivery one second past the deadline still counts as late.

use tmon_policies::{finalization_latency, signature, PolicyParams};
use tmon_runtime::{Monitor, MonitorSettings, Outcome};
use tmon_schemas::{Fact, Value};

fn event(rel: &str, hash: u8, ts: u64) -> Fact {
    Fact::new(
        rel,
        vec![
            Value::principal("r"),
            Value::principal("s1"),
            Value::bytes(vec![hash]),
        ],
        ts,
    )
}

#[test]
fn undelivered_and_late_batches_are_reported() {
    let mut m = Monitor::new(signature(), MonitorSettings::default());
    let h = m
        .register("finalization_latency", &finalization_latency(&PolicyParams::default()))
        .unwrap();

    m.submit(event("proposal_moved", 1, 100)).unwrap();
    m.submit(event("proposal_moved", 2, 200)).unwrap();
    m.submit(event("proposal_moved", 3, 300)).unwrap();
    m.submit(event("batch_delivered", 1, 500)).unwrap();
    m.submit(event("batch_delivered", 3, 901)).unwrap();
    m.finish();

    let late: Vec<(u64, Value)> = m
        .take_verdicts()
        .into_iter()
        .filter(|v| v.rule == h)
        .flat_map(|v| {
            let Outcome::Assignments { rows } = v.outcome else {
                panic!("expected assignments");
            };
            rows.into_iter().map(move |row| (v.ts, row["h"].clone()))
        })
        .collect();
    assert_eq!(
        late,
        vec![(200, Value::bytes(vec![2])), (300, Value::bytes(vec![3]))]
    );
}
