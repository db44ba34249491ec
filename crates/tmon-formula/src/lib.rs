//! tmon-formula
//!
//! Rules are built as data with [`Expr`] and compiled once into an immutable
//! [`Formula`]. Compilation is the only place safety is decided:
//! - every variable of a negated, compared or future-looking operand must be
//!   bound by a positive operand (range restriction);
//! - types are inferred from relation signatures and must agree;
//! - node ids are dense, so evaluation state can live in a flat store.
//!
//! Pure deterministic logic. No IO, no wall-clock.

mod error;
mod expr;
mod formula;
mod term;

pub use error::FormulaError;
pub use expr::{AggOp, Expr, Interval};
pub use formula::{AndMode, AtomArg, Formula, Node, NodeId, NodeKind};
pub use term::{CmpOp, Term, Var};
