//! Construction-time safety and typing.
//!
//! GREEN when:
//! - A bare negated atom is rejected with UnsafeFormula and never compiles.
//! - Negation and comparisons are accepted once a positive operand binds their variables,
//!   regardless of the side the positive operand is written on.
//! - Aggregates over non-numeric columns and unbounded futures are rejected.

use tmon_formula::*;
use tmon_schemas::{Signature, Value, ValueType};

fn sig() -> Signature {
    Signature::new()
        .with_relation("p", &[("x", ValueType::Int)])
        .with_relation("q", &[("x", ValueType::Int), ("y", ValueType::Int)])
        .with_relation("named", &[("x", ValueType::Int), ("who", ValueType::Principal)])
}

#[test]
fn bare_negated_atom_is_unsafe() {
    let err = Formula::compile(&Expr::negate(Expr::pred("p", &["x"])), &sig()).unwrap_err();
    assert!(err.is_unsafe(), "got {err}");
}

#[test]
fn double_negation_in_conjunction_is_unsafe() {
    let e = Expr::negate(Expr::pred("p", &["x"])).and_not(Expr::pred("p", &["x"]));
    assert!(Formula::compile(&e, &sig()).unwrap_err().is_unsafe());
}

#[test]
fn negation_bound_by_left_operand_compiles_as_anti_join() {
    let e = Expr::pred("q", &["x", "y"]).and_not(Expr::pred("p", &["x"]));
    let f = Formula::compile(&e, &sig()).unwrap();
    match &f.root().kind {
        NodeKind::And { mode, .. } => assert_eq!(*mode, AndMode::AntiJoin),
        other => panic!("unexpected root {other:?}"),
    }
    assert_eq!(f.free_vars(), &["x".to_string(), "y".to_string()]);
}

#[test]
fn negation_written_first_is_swapped() {
    let e = Expr::negate(Expr::pred("p", &["x"])).and(Expr::pred("q", &["x", "y"]));
    let f = Formula::compile(&e, &sig()).unwrap();
    assert!(matches!(
        f.root().kind,
        NodeKind::And { mode: AndMode::AntiJoin, .. }
    ));
}

#[test]
fn negation_with_unbound_variable_is_unsafe() {
    let e = Expr::pred("p", &["x"]).and_not(Expr::pred("q", &["x", "y"]));
    assert!(Formula::compile(&e, &sig()).unwrap_err().is_unsafe());
}

#[test]
fn closed_negation_is_allowed() {
    let e = Expr::negate(Expr::exists(&["x"], Expr::pred("p", &["x"])));
    let f = Formula::compile(&e, &sig()).unwrap();
    assert!(f.is_closed());
}

#[test]
fn comparison_modes() {
    let filter = Expr::pred("q", &["x", "y"]).and(Expr::cmp(CmpOp::Lt, Term::var("x"), Term::var("y")));
    let f = Formula::compile(&filter, &sig()).unwrap();
    assert!(matches!(f.root().kind, NodeKind::And { mode: AndMode::Filter, .. }));

    let assign = Expr::pred("p", &["x"]).and(Expr::eq(
        Term::var("z"),
        Term::var("x").mul(Term::float(0.5)),
    ));
    let f = Formula::compile(&assign, &sig()).unwrap();
    assert!(matches!(f.root().kind, NodeKind::And { mode: AndMode::Assign, .. }));
    assert_eq!(f.root().var_types.get("z"), Some(&ValueType::Float));

    let unbound = Expr::pred("p", &["x"]).and(Expr::cmp(CmpOp::Gt, Term::var("z"), Term::int(1)));
    assert!(Formula::compile(&unbound, &sig()).unwrap_err().is_unsafe());

    let free_standing = Expr::cmp(CmpOp::Lt, Term::var("x"), Term::int(3));
    assert!(Formula::compile(&free_standing, &sig()).unwrap_err().is_unsafe());

    let constant = Expr::eq(Term::var("x"), Term::int(3));
    assert_eq!(Formula::compile(&constant, &sig()).unwrap().free_vars(), &["x".to_string()]);
}

#[test]
fn disjunction_needs_equal_free_variables() {
    let e = Expr::pred("p", &["x"]).or(Expr::pred("q", &["x", "y"]));
    assert!(Formula::compile(&e, &sig()).unwrap_err().is_unsafe());

    let ok = Expr::pred("p", &["x"]).or(Expr::exists(&["y"], Expr::pred("q", &["x", "y"])));
    assert!(Formula::compile(&ok, &sig()).is_ok());
}

#[test]
fn temporal_interval_checks() {
    let unbounded = Expr::eventually(Interval::unbounded(0), Expr::pred("p", &["x"]));
    assert_eq!(Formula::compile(&unbounded, &sig()), Err(FormulaError::UnboundedFuture));

    let inverted = Expr::once(Interval::bounded(10, 5), Expr::pred("p", &["x"]));
    assert_eq!(
        Formula::compile(&inverted, &sig()),
        Err(FormulaError::InvalidInterval { lo: 10, hi: 5 })
    );

    let past = Expr::once(Interval::unbounded(0), Expr::pred("p", &["x"]));
    assert!(Formula::compile(&past, &sig()).is_ok());
}

#[test]
fn aggregation_typing() {
    let sum_principal = Expr::aggregate(AggOp::Sum, "s", "who", &["x"], Expr::pred("named", &["x", "who"]));
    assert!(matches!(
        Formula::compile(&sum_principal, &sig()),
        Err(FormulaError::NonNumericAggregate { op: AggOp::Sum, .. })
    ));

    let max_principal = Expr::aggregate(AggOp::Max, "m", "who", &["x"], Expr::pred("named", &["x", "who"]));
    let f = Formula::compile(&max_principal, &sig()).unwrap();
    assert_eq!(f.root().var_types.get("m"), Some(&ValueType::Principal));

    let avg = Expr::aggregate(AggOp::Avg, "a", "y", &["x"], Expr::pred("q", &["x", "y"]));
    let f = Formula::compile(&avg, &sig()).unwrap();
    assert_eq!(f.root().var_types.get("a"), Some(&ValueType::Float));
    assert_eq!(f.free_vars(), &["a".to_string(), "x".to_string()]);

    let bad_group = Expr::count("c", &["zz"], Expr::pred("p", &["x"]));
    assert!(matches!(
        Formula::compile(&bad_group, &sig()),
        Err(FormulaError::InvalidAggregate { .. })
    ));
}

#[test]
fn fill_checks_columns_and_default_type() {
    let body = Expr::count("n", &["x"], Expr::pred("q", &["x", "y"]));
    let good = Expr::fill(body.clone(), Expr::pred("p", &["x"]), "n", Value::int(0));
    assert!(Formula::compile(&good, &sig()).is_ok());

    let wrong_default = Expr::fill(body.clone(), Expr::pred("p", &["x"]), "n", Value::float(0.0));
    assert!(matches!(
        Formula::compile(&wrong_default, &sig()),
        Err(FormulaError::TypeConflict { .. })
    ));

    let wrong_keys = Expr::fill(body, Expr::pred("q", &["x", "y"]), "n", Value::int(0));
    assert!(matches!(
        Formula::compile(&wrong_keys, &sig()),
        Err(FormulaError::InvalidFill { .. })
    ));
}

#[test]
fn atoms_are_checked_against_the_signature() {
    assert!(matches!(
        Formula::compile(&Expr::pred("missing", &["x"]), &sig()),
        Err(FormulaError::UnknownRelation { .. })
    ));
    assert!(matches!(
        Formula::compile(&Expr::pred("q", &["x"]), &sig()),
        Err(FormulaError::ArityMismatch { expected: 2, got: 1, .. })
    ));
    let bad_const = Expr::atom("p", [Term::principal("n1")]);
    assert!(matches!(
        Formula::compile(&bad_const, &sig()),
        Err(FormulaError::TypeConflict { .. })
    ));
    let shared = Expr::pred("named", &["x", "who"]).and(Expr::pred("q", &["who", "y"]));
    assert!(matches!(
        Formula::compile(&shared, &sig()),
        Err(FormulaError::TypeConflict { .. })
    ));
}

#[test]
fn future_horizon_sums_nested_lookahead() {
    let e = Expr::pred("p", &["x"]).and(Expr::eventually(
        Interval::bounded(0, 600),
        Expr::eventually(Interval::bounded(0, 30), Expr::pred("p", &["x"])),
    ));
    let f = Formula::compile(&e, &sig()).unwrap();
    assert_eq!(f.future_horizon(), 630);
    assert_eq!(f.node_count(), 5);
}
