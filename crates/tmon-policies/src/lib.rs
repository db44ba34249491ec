//! tmon-policies
//!
//! Monitoring policies for a subnet-based block protocol, expressed as
//! formulas over the protocol signature, plus a catalogue to look them up by
//! name.

mod protocol;
mod registry;

pub use protocol::{
    anomaly, anomaly_any, finalization_latency, mean_proposals, num_created_one_day, relevant,
    signature, variance_proposals, PolicyParams,
};
pub use registry::{builtin_registry, PolicyFactory, PolicyMeta, PolicyRegistry, RegistryError};
