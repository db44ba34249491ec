use crate::value::{Ts, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Positional field values of one fact or one binding row.
pub type Tuple = Vec<Value>;

/// Immutable observation: `relation(fields..)` at `ts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub relation: String,
    pub fields: Tuple,
    pub ts: Ts,
}

impl Fact {
    pub fn new(relation: impl Into<String>, fields: Tuple, ts: Ts) -> Self {
        Self {
            relation: relation.into(),
            fields,
            ts,
        }
    }
}

/// All facts sharing one timestamp. Set semantics: a duplicate fact is stored once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Database {
    relations: BTreeMap<String, BTreeSet<Tuple>>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, relation: impl Into<String>, fields: Tuple) -> bool {
        self.relations
            .entry(relation.into())
            .or_default()
            .insert(fields)
    }

    /// Tuples of `relation`, in value order.
    pub fn tuples<'a>(&'a self, relation: &str) -> impl Iterator<Item = &'a Tuple> + 'a {
        self.relations.get(relation).into_iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.relations.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A sealed time point: no further facts will join it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimePoint {
    pub ts: Ts,
    pub db: Database,
}

impl TimePoint {
    pub fn new(ts: Ts, db: Database) -> Self {
        Self { ts, db }
    }

    pub fn empty(ts: Ts) -> Self {
        Self::new(ts, Database::new())
    }
}
