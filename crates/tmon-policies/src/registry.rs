//! Policy catalogue.
//!
//! Each entry pairs static metadata with a factory that builds the policy
//! formula from [`PolicyParams`]. The monitor only ever sees the resulting
//! `Expr`; discovery and parameterisation stay here. `list()` preserves
//! insertion order.

use crate::protocol::{self, PolicyParams};
use tmon_formula::Expr;

// ---------------------------------------------------------------------------
// Factory + metadata
// ---------------------------------------------------------------------------

pub type PolicyFactory = Box<dyn Fn(&PolicyParams) -> Expr + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyMeta {
    /// Registry key. Non-empty; ASCII alphanumerics, `-` and `_`.
    pub name: String,
    pub version: String,
    pub description: String,
}

impl PolicyMeta {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateName { name: String },
    UnknownPolicy { name: String },
    EmptyName,
    InvalidName { name: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName { name } => write!(f, "policy '{name}' is already registered"),
            Self::UnknownPolicy { name } => write!(f, "no policy named '{name}' is registered"),
            Self::EmptyName => write!(f, "policy name must not be empty"),
            Self::InvalidName { name } => write!(
                f,
                "policy name '{name}' may only contain ASCII letters, digits, '-' and '_'"
            ),
        }
    }
}

impl std::error::Error for RegistryError {}

// ---------------------------------------------------------------------------
// PolicyRegistry
// ---------------------------------------------------------------------------

struct RegistryEntry {
    meta: PolicyMeta,
    factory: PolicyFactory,
}

#[derive(Default)]
pub struct PolicyRegistry {
    entries: Vec<RegistryEntry>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, meta: PolicyMeta, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&PolicyParams) -> Expr + Send + Sync + 'static,
    {
        if meta.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if !meta
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(RegistryError::InvalidName { name: meta.name });
        }
        if self.contains(&meta.name) {
            return Err(RegistryError::DuplicateName { name: meta.name });
        }
        self.entries.push(RegistryEntry {
            meta,
            factory: Box::new(factory),
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.meta.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn list(&self) -> Vec<&PolicyMeta> {
        self.entries.iter().map(|e| &e.meta).collect()
    }

    pub fn lookup(&self, name: &str) -> Result<&PolicyMeta, RegistryError> {
        self.entry(name).map(|e| &e.meta)
    }

    /// Build a fresh formula for `name` with `params`.
    pub fn instantiate(&self, name: &str, params: &PolicyParams) -> Result<Expr, RegistryError> {
        self.entry(name).map(|e| (e.factory)(params))
    }

    /// Remove `name`. Returns false when it was not registered.
    pub fn deregister(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.meta.name != name);
        self.entries.len() < before
    }

    fn entry(&self, name: &str) -> Result<&RegistryEntry, RegistryError> {
        self.entries
            .iter()
            .find(|e| e.meta.name == name)
            .ok_or_else(|| RegistryError::UnknownPolicy {
                name: name.to_string(),
            })
    }
}

/// Catalogue of the protocol policies shipped with the monitor.
pub fn builtin_registry() -> PolicyRegistry {
    let builtins: [(&str, &str, fn(&PolicyParams) -> Expr); 4] = [
        (
            "num_created_one_day",
            "blocks proposed per (reporting node, subnet, signer) in the window, zero-filled",
            protocol::num_created_one_day,
        ),
        (
            "anomaly",
            "signers whose proposal count deviates from the subnet mean beyond the threshold",
            protocol::anomaly,
        ),
        (
            "anomaly_any",
            "some signer's proposal count is anomalous",
            protocol::anomaly_any,
        ),
        (
            "finalization_latency",
            "moved proposals whose batch is not delivered within the deadline",
            protocol::finalization_latency,
        ),
    ];

    let mut reg = PolicyRegistry::new();
    for (name, description, build) in builtins {
        // Names above are distinct and valid.
        let _ = reg.register(PolicyMeta::new(name, "1.0.0", description), build);
    }
    reg
}
