use crate::expr::AggOp;
use std::fmt;
use tmon_schemas::ValueType;

/// Construction-time rejection. A formula that fails here is never evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaError {
    /// Negation, comparison or quantification over variables that no positive
    /// context range-restricts.
    UnsafeFormula { reason: String },
    UnknownRelation { relation: String },
    ArityMismatch {
        relation: String,
        expected: usize,
        got: usize,
    },
    /// Atom arguments must be variables or constants.
    InvalidAtomArgument { relation: String, position: usize },
    /// A constant or shared variable disagrees with a declared field type.
    TypeConflict {
        var: String,
        first: ValueType,
        second: ValueType,
    },
    NonNumericTerm { ty: ValueType },
    IncomparableTypes { left: ValueType, right: ValueType },
    NonNumericAggregate {
        op: AggOp,
        var: String,
        ty: ValueType,
    },
    InvalidAggregate { reason: String },
    InvalidFill { reason: String },
    InvalidInterval { lo: u64, hi: u64 },
    /// `Eventually` needs a finite upper bound.
    UnboundedFuture,
}

impl FormulaError {
    pub(crate) fn unsafe_formula(reason: impl Into<String>) -> Self {
        FormulaError::UnsafeFormula {
            reason: reason.into(),
        }
    }

    pub fn is_unsafe(&self) -> bool {
        matches!(self, FormulaError::UnsafeFormula { .. })
    }
}

impl fmt::Display for FormulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaError::UnsafeFormula { reason } => write!(f, "unsafe formula: {reason}"),
            FormulaError::UnknownRelation { relation } => {
                write!(f, "unknown relation '{relation}'")
            }
            FormulaError::ArityMismatch {
                relation,
                expected,
                got,
            } => write!(
                f,
                "atom '{relation}' has {got} arguments, relation declares {expected}"
            ),
            FormulaError::InvalidAtomArgument { relation, position } => write!(
                f,
                "atom '{relation}' argument {position} must be a variable or a constant"
            ),
            FormulaError::TypeConflict { var, first, second } => {
                write!(f, "'{var}' used as both {first} and {second}")
            }
            FormulaError::NonNumericTerm { ty } => {
                write!(f, "arithmetic over non-numeric type {ty}")
            }
            FormulaError::IncomparableTypes { left, right } => {
                write!(f, "cannot compare {left} with {right}")
            }
            FormulaError::NonNumericAggregate { op, var, ty } => {
                write!(f, "{op} over non-numeric variable '{var}' of type {ty}")
            }
            FormulaError::InvalidAggregate { reason } => write!(f, "invalid aggregate: {reason}"),
            FormulaError::InvalidFill { reason } => write!(f, "invalid fill: {reason}"),
            FormulaError::InvalidInterval { lo, hi } => {
                write!(f, "invalid interval [{lo},{hi}]: lower bound exceeds upper bound")
            }
            FormulaError::UnboundedFuture => {
                write!(f, "eventually requires a finite upper bound")
            }
        }
    }
}

impl std::error::Error for FormulaError {}
