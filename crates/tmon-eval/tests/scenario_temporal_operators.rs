//! Temporal operators driven directly through the rule engine.
//!
//! GREEN when:
//! - An Eventually[0,600] obligation opened at t=100 resolves true when the awaited
//!   fact arrives at t=550, false when it arrives at t=750, and nothing is emitted
//!   for t=100 while the watermark is at most 700.
//! - Once windows expire entries exactly past their upper bound.
//! - Retained state stays bounded over a long trace, and the retention limit
//!   evicts and flags degraded instead of growing.
//! - A watermark advance alone expires Once entries past their upper bound.
//! - Join buffers held behind a pending Eventually obey the retention limit.

use std::sync::Arc;
use tmon_eval::{RetentionLimit, RuleEngine, Verdict};
use tmon_formula::{Expr, Formula, Interval};
use tmon_schemas::{Database, Signature, Value, ValueType};

fn sig() -> Signature {
    Signature::new()
        .with_relation("p", &[("x", ValueType::Int)])
        .with_relation("q", &[("x", ValueType::Int)])
}

fn engine(expr: Expr) -> RuleEngine {
    let formula = Formula::compile(&expr, &sig()).unwrap();
    RuleEngine::new(Arc::new(formula), RetentionLimit::default())
}

fn db(facts: &[(&str, i64)]) -> Database {
    let mut db = Database::new();
    for (rel, x) in facts {
        db.insert(*rel, vec![Value::int(*x)]);
    }
    db
}

fn moved_then_delivered() -> Expr {
    Expr::pred("p", &["x"]).and(Expr::eventually(
        Interval::bounded(0, 600),
        Expr::pred("q", &["x"]),
    ))
}

fn holds_for(v: &Verdict, x: i64) -> bool {
    v.table.contains(&vec![Value::int(x)])
}

#[test]
fn eventually_discharged_inside_the_window() {
    let mut e = engine(moved_then_delivered());

    // p(1) at 100 sealed by a fact at 550.
    assert!(e.push(100, &db(&[("p", 1)]), 550).is_empty());
    // q(1) at 550 sealed by the watermark reaching 700: still not final.
    assert!(e.push(550, &db(&[("q", 1)]), 700).is_empty());
    assert!(e.advance(700).is_empty());
    assert_eq!(e.pending(), 2);

    let out = e.advance(701);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].ts, 100);
    assert!(holds_for(&out[0], 1));
    assert_eq!(out[0].table.derived_at(&vec![Value::int(1)]), Some(550));
}

#[test]
fn eventually_fails_when_witness_arrives_late() {
    let mut e = engine(moved_then_delivered());

    let out = e.push(100, &db(&[("p", 1)]), 750);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].ts, 100);
    assert!(!out[0].holds());

    // The late fact does not revise the verdict for 100.
    let out = e.push(750, &db(&[("q", 1)]), 2000);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].ts, 750);
    assert!(!out[0].holds());
}

#[test]
fn nothing_emitted_before_deadline_passes() {
    let mut e = engine(moved_then_delivered());
    assert!(e.push(100, &db(&[("p", 1)]), 101).is_empty());
    for w in [200, 400, 699, 700] {
        assert!(e.advance(w).is_empty(), "emitted at watermark {w}");
    }
    assert_eq!(e.advance(701).len(), 1);
}

#[test]
fn later_time_points_progress_while_obligation_is_pending() {
    // Past-only rule next to a pending future: ingestion never stalls.
    let mut e = engine(Expr::pred("p", &["x"]).or(Expr::eventually(
        Interval::bounded(0, 600),
        Expr::pred("q", &["x"]),
    )));
    for (i, ts) in [100u64, 200, 300].iter().enumerate() {
        e.push(*ts, &db(&[("p", i as i64)]), ts + 1);
    }
    assert_eq!(e.sealed(), 3);
    let out = e.advance(901);
    assert_eq!(out.iter().map(|v| v.ts).collect::<Vec<_>>(), vec![100, 200, 300]);
}

#[test]
fn once_window_bounds_are_inclusive() {
    let mut e = engine(Expr::pred("p", &["x"]).and(Expr::once(
        Interval::bounded(0, 10),
        Expr::pred("q", &["x"]),
    )));
    assert!(!e.push(0, &db(&[("q", 1)]), 1)[0].holds());
    assert!(e.push(10, &db(&[("p", 1)]), 11)[0].holds());
    assert!(!e.push(11, &db(&[("p", 1)]), 12)[0].holds());
}

#[test]
fn negated_once_is_an_anti_join() {
    let mut e = engine(Expr::pred("p", &["x"]).and_not(Expr::once(
        Interval::bounded(0, 5),
        Expr::pred("q", &["x"]),
    )));
    e.push(0, &db(&[("q", 1)]), 1);
    let out = e.push(3, &db(&[("p", 1), ("p", 2)]), 4);
    assert_eq!(out[0].table.len(), 1);
    assert!(holds_for(&out[0], 2));
}

#[test]
fn once_window_memory_is_independent_of_trace_length() {
    let mut e = engine(Expr::once(Interval::bounded(0, 100), Expr::pred("q", &["x"])));
    let mut peak = 0;
    for ts in 0..20_000u64 {
        e.push(ts, &db(&[("q", ts as i64)]), ts + 1);
        if ts > 200 {
            peak = peak.max(e.retained_rows());
        }
    }
    assert!(peak <= 101, "peak retained rows {peak}");
    assert!(!e.is_degraded());
}

#[test]
fn eventually_obligations_are_released_behind_the_watermark() {
    let mut e = engine(moved_then_delivered());
    let mut peak = 0;
    for ts in 0..10_000u64 {
        e.push(ts * 10, &db(&[("p", 1), ("q", 1)]), ts * 10 + 1);
        peak = peak.max(e.retained_rows());
    }
    // Obligations live for 600 s at one time point per 10 s; the join buffers
    // the matching left results for the same span.
    assert!(peak <= 2 * 61, "peak retained rows {peak}");
    assert!(e.pending() <= 61);
}

#[test]
fn retention_limit_evicts_and_flags_degraded() {
    let formula = Formula::compile(
        &Expr::once(Interval::unbounded(0), Expr::pred("q", &["x"])),
        &sig(),
    )
    .unwrap();
    let mut e = RuleEngine::new(
        Arc::new(formula),
        RetentionLimit {
            max_rows_per_node: 50,
        },
    );
    let mut last = Vec::new();
    for ts in 0..200u64 {
        last = e.push(ts, &db(&[("q", ts as i64)]), ts + 1);
    }
    assert!(e.retained_rows() <= 50);
    assert!(e.is_degraded());
    assert!(last[0].degraded);
    // Newest rows survive eviction.
    assert!(holds_for(&last[0], 199));
    assert_eq!(e.take_newly_degraded().len(), 1);
    assert!(e.take_newly_degraded().is_empty());
}

#[test]
fn quiet_watermark_advance_expires_once_window() {
    let mut e = engine(Expr::once(Interval::bounded(0, 10), Expr::pred("q", &["x"])));
    let facts: Vec<(&str, i64)> = (0..100).map(|x| ("q", x)).collect();
    e.push(0, &db(&facts), 1);
    assert_eq!(e.retained_rows(), 100);

    assert!(e.advance(10).is_empty());
    assert_eq!(e.retained_rows(), 100);
    assert!(e.advance(1_000_000).is_empty());
    assert_eq!(e.retained_rows(), 0);
    assert!(!e.is_degraded());
}

#[test]
fn retention_limit_applies_to_join_buffers() {
    let formula = Formula::compile(&moved_then_delivered(), &sig()).unwrap();
    let mut e = RuleEngine::new(
        Arc::new(formula),
        RetentionLimit {
            max_rows_per_node: 10,
        },
    );
    for ts in 0..50u64 {
        let facts: Vec<(&str, i64)> = (0..5).map(|x| ("p", ts as i64 * 5 + x)).collect();
        assert!(e.push(ts, &db(&facts), ts + 1).is_empty());
    }
    assert!(e.retained_rows() <= 10, "retained {}", e.retained_rows());
    assert!(e.is_degraded());
    assert_eq!(e.take_newly_degraded().len(), 1);

    // Buffered time points are still answered, flagged degraded.
    let out = e.advance(10_000);
    assert_eq!(out.len(), 50);
    assert!(out.iter().all(|v| v.degraded && !v.holds()));
}
