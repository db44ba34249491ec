//! tmon-schemas
//!
//! Shared data model of the monitor: values, facts, relation signatures and
//! the per-timestamp fact set (`Database`).
//!
//! Pure data. No IO, no wall-clock.

mod fact;
mod signature;
mod value;

pub use fact::{Database, Fact, TimePoint, Tuple};
pub use signature::{FieldSchema, InputError, RelationSchema, Signature};
pub use value::{Ts, Value, ValueType, TS_END};
