//! Incremental evaluation agrees with the brute-force reference.
//!
//! GREEN when, for random traces and every formula in the catalogue below:
//! - The engine emits exactly one verdict per time point, in order.
//! - Each verdict has the same rows as the reference evaluator.
//! - The monitor (with parallel fan-out) reports the same outcomes.

use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tmon_eval::{RetentionLimit, RuleEngine};
use tmon_formula::{AggOp, CmpOp, Expr, Formula, Interval, Term};
use tmon_runtime::{Monitor, MonitorSettings, Outcome};
use tmon_schemas::{TimePoint, Tuple, Value, TS_END};
use tmon_testkit::{facts_of, random_trace, small_signature, Oracle, Relation, TraceShape};

fn p(v: &str) -> Expr {
    Expr::pred("p", &[v])
}

fn q(v: &str) -> Expr {
    Expr::pred("q", &[v])
}

fn r(a: &str, b: &str) -> Expr {
    Expr::pred("r", &[a, b])
}

fn catalogue() -> Vec<Expr> {
    vec![
        p("x").and(Expr::once(Interval::bounded(0, 5), q("x"))),
        p("x").and_not(Expr::once(Interval::bounded(1, 4), q("x"))),
        p("x").and(Expr::eventually(Interval::bounded(0, 6), q("x"))),
        r("x", "y").and_not(Expr::eventually(Interval::bounded(2, 5), q("y"))),
        Expr::exists(&["y"], r("x", "y")).or(p("x")),
        Expr::count("n", &["x"], Expr::once(Interval::bounded(0, 10), r("x", "y"))),
        Expr::aggregate(
            AggOp::Sum,
            "s",
            "y",
            &["x"],
            r("x", "y").and(Expr::cmp(CmpOp::Gt, Term::var("y"), Term::int(1))),
        ),
        Expr::aggregate(AggOp::Avg, "a", "x", &[], Expr::once(Interval::bounded(0, 3), p("x"))),
        Expr::aggregate(AggOp::Max, "hi", "y", &["x"], r("x", "y")),
        Expr::fill(
            Expr::aggregate(AggOp::Cnt, "n", "y", &["x"], r("x", "y")),
            p("x"),
            "n",
            Value::int(0),
        ),
        r("x", "y")
            .and(Expr::eq(Term::var("z"), Term::var("x").add(Term::var("y"))))
            .and(Expr::cmp(CmpOp::Ge, Term::var("z"), Term::int(3))),
        Expr::eventually(Interval::bounded(0, 4), Expr::exists(&["x"], q("x"))),
        Expr::once(Interval::unbounded(2), p("x")).and(q("x")),
        p("x").and(Expr::once(
            Interval::bounded(0, 8),
            q("x").and(Expr::eventually(Interval::bounded(0, 3), p("x"))),
        )),
    ]
}

fn engine_rows(formula: Formula, trace: &[TimePoint]) -> Vec<(u64, Relation)> {
    let mut engine = RuleEngine::new(Arc::new(formula), RetentionLimit::default());
    let mut out = Vec::new();
    for (i, tp) in trace.iter().enumerate() {
        let watermark = trace.get(i + 1).map_or(tp.ts + 1, |next| next.ts);
        out.extend(engine.push(tp.ts, &tp.db, watermark));
    }
    out.extend(engine.advance(TS_END));
    out.into_iter()
        .map(|v| (v.index, v.table.rows().map(|(row, _)| row.clone()).collect()))
        .collect()
}

fn check(which: usize, seed: u64) {
    let sig = small_signature();
    let expr = &catalogue()[which];
    let trace = random_trace(seed, &sig, TraceShape::default());
    let formula = Formula::compile(expr, &sig).unwrap();

    let expected = Oracle::new(&formula, &trace).eval_all();
    let got = engine_rows(formula, &trace);

    let indices: Vec<u64> = got.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, (0..trace.len() as u64).collect::<Vec<_>>(), "formula #{which}");
    for (i, rows) in got {
        assert_eq!(rows, expected[i as usize], "formula #{which}, seed {seed}, time point {i}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn engine_agrees_with_reference(which in 0..catalogue().len(), seed in any::<u64>()) {
        check(which, seed);
    }
}

#[test]
fn every_catalogue_formula_on_a_fixed_seed() {
    for which in 0..catalogue().len() {
        check(which, 42);
    }
}

#[test]
fn monitor_agrees_with_reference() {
    let sig = small_signature();
    let trace = random_trace(2024, &sig, TraceShape::default());
    let mut m = Monitor::new(sig.clone(), MonitorSettings::default());
    let rules: Vec<_> = catalogue()
        .iter()
        .enumerate()
        .map(|(i, e)| m.register(&format!("f{i}"), e).unwrap())
        .collect();

    let facts = facts_of(&trace, &sig);
    let mut next = facts.iter().peekable();
    for tp in &trace {
        m.tick(tp.ts).unwrap();
        while let Some(f) = next.next_if(|f| f.ts == tp.ts) {
            m.submit(f.clone()).unwrap();
        }
    }
    m.finish();
    let verdicts = m.take_verdicts();

    for (which, handle) in rules.iter().enumerate() {
        let formula = Formula::compile(&catalogue()[which], &sig).unwrap();
        let vars = formula.free_vars().to_vec();
        let expected = Oracle::new(&formula, &trace).eval_all();
        let mine: Vec<_> = verdicts.iter().filter(|v| v.rule == *handle).collect();
        assert_eq!(mine.len(), trace.len());
        for v in mine {
            let want = &expected[v.index as usize];
            match &v.outcome {
                Outcome::Boolean { holds } => assert_eq!(*holds, !want.is_empty()),
                Outcome::Assignments { rows } => {
                    let got: BTreeSet<Tuple> = rows
                        .iter()
                        .map(|row| vars.iter().map(|var| row[var].clone()).collect())
                        .collect();
                    assert_eq!(&got, want, "formula #{which} at index {}", v.index);
                }
            }
        }
    }
}
