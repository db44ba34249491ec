use crate::fact::Fact;
use crate::value::{Ts, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub ty: ValueType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl RelationSchema {
    pub fn arity(&self) -> usize {
        self.fields.len()
    }
}

/// Declared relations of a trace. Facts and atoms are checked against it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    relations: BTreeMap<String, RelationSchema>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name(field: type, ..)`. Redeclaring a relation replaces it.
    pub fn with_relation(mut self, name: &str, fields: &[(&str, ValueType)]) -> Self {
        self.add_relation(name, fields);
        self
    }

    pub fn add_relation(&mut self, name: &str, fields: &[(&str, ValueType)]) {
        let schema = RelationSchema {
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(n, ty)| FieldSchema {
                    name: (*n).to_string(),
                    ty: *ty,
                })
                .collect(),
        };
        self.relations.insert(name.to_string(), schema);
    }

    pub fn relation(&self, name: &str) -> Option<&RelationSchema> {
        self.relations.get(name)
    }

    pub fn relations(&self) -> impl Iterator<Item = &RelationSchema> {
        self.relations.values()
    }

    /// Strict typing: field count and every field's kind must match the declaration.
    pub fn check(&self, fact: &Fact) -> Result<(), InputError> {
        let schema = self
            .relation(&fact.relation)
            .ok_or_else(|| InputError::UnknownRelation {
                relation: fact.relation.clone(),
            })?;

        if schema.arity() != fact.fields.len() {
            return Err(InputError::ArityMismatch {
                relation: fact.relation.clone(),
                expected: schema.arity(),
                got: fact.fields.len(),
            });
        }

        for (field, value) in schema.fields.iter().zip(&fact.fields) {
            let got = value.value_type();
            if got != field.ty {
                return Err(InputError::TypeMismatch {
                    relation: fact.relation.clone(),
                    field: field.name.clone(),
                    expected: field.ty,
                    got,
                });
            }
        }
        Ok(())
    }
}

/// Rejection of a submitted fact. A rejected fact never touches evaluation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    /// Fact timestamp is below the input watermark.
    OutOfOrderFact { ts: Ts, watermark: Ts },
    UnknownRelation { relation: String },
    ArityMismatch {
        relation: String,
        expected: usize,
        got: usize,
    },
    TypeMismatch {
        relation: String,
        field: String,
        expected: ValueType,
        got: ValueType,
    },
    /// The end-of-trace timestamp is reserved.
    ReservedTimestamp,
    /// The monitor has finished; no more input is accepted.
    MonitorClosed,
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::OutOfOrderFact { ts, watermark } => {
                write!(f, "out-of-order fact: ts {ts} is below watermark {watermark}")
            }
            InputError::UnknownRelation { relation } => {
                write!(f, "unknown relation '{relation}'")
            }
            InputError::ArityMismatch {
                relation,
                expected,
                got,
            } => write!(
                f,
                "arity mismatch for '{relation}': expected {expected} fields, got {got}"
            ),
            InputError::TypeMismatch {
                relation,
                field,
                expected,
                got,
            } => write!(
                f,
                "type mismatch for '{relation}.{field}': expected {expected}, got {got}"
            ),
            InputError::ReservedTimestamp => write!(f, "timestamp u64::MAX is reserved"),
            InputError::MonitorClosed => write!(f, "monitor is closed"),
        }
    }
}

impl std::error::Error for InputError {}
