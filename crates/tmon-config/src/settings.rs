//! Typed views over the merged config. Every key is optional.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;
use tmon_eval::RetentionLimit;
use tmon_runtime::MonitorSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorConfig {
    pub max_retained_rows_per_node: u64,
    pub parallel_rules: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_retained_rows_per_node: 1_000_000,
            parallel_rules: true,
        }
    }
}

impl MonitorConfig {
    pub fn from_json(cfg: &Value) -> Result<Self> {
        let d = Self::default();
        let max_retained_rows_per_node =
            read_u64(cfg, "/monitor/max_retained_rows_per_node", d.max_retained_rows_per_node)?;
        if max_retained_rows_per_node == 0 {
            bail!("/monitor/max_retained_rows_per_node must be at least 1");
        }
        Ok(Self {
            max_retained_rows_per_node,
            parallel_rules: read_bool(cfg, "/monitor/parallel_rules", d.parallel_rules)?,
        })
    }

    pub fn to_settings(&self, output: &OutputConfig) -> Result<MonitorSettings> {
        let max_rows_per_node = usize::try_from(self.max_retained_rows_per_node)
            .context("/monitor/max_retained_rows_per_node does not fit in usize")?;
        Ok(MonitorSettings {
            retention: RetentionLimit { max_rows_per_node },
            parallel_rules: self.parallel_rules,
            violations_only: output.violations_only,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputConfig {
    pub violations_only: bool,
    pub hash_chain: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            violations_only: false,
            hash_chain: true,
        }
    }
}

impl OutputConfig {
    pub fn from_json(cfg: &Value) -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            violations_only: read_bool(cfg, "/output/violations_only", d.violations_only)?,
            hash_chain: read_bool(cfg, "/output/hash_chain", d.hash_chain)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PolicyConfig {
    pub anomaly_window_secs: u64,
    /// Squared-deviation factor: 9.0 flags counts more than 3 sigma from the mean.
    pub anomaly_threshold_factor: f64,
    pub finalization_deadline_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            anomaly_window_secs: 86_400,
            anomaly_threshold_factor: 9.0,
            finalization_deadline_secs: 600,
        }
    }
}

impl PolicyConfig {
    pub fn from_json(cfg: &Value) -> Result<Self> {
        let d = Self::default();
        let anomaly_threshold_factor =
            read_f64(cfg, "/policies/anomaly/threshold_factor", d.anomaly_threshold_factor)?;
        if !anomaly_threshold_factor.is_finite() || anomaly_threshold_factor < 0.0 {
            bail!("/policies/anomaly/threshold_factor must be a finite non-negative number");
        }
        Ok(Self {
            anomaly_window_secs: read_u64(cfg, "/policies/anomaly/window_secs", d.anomaly_window_secs)?,
            anomaly_threshold_factor,
            finalization_deadline_secs: read_u64(
                cfg,
                "/policies/finalization/deadline_secs",
                d.finalization_deadline_secs,
            )?,
        })
    }
}

fn present<'a>(cfg: &'a Value, ptr: &str) -> Option<&'a Value> {
    cfg.pointer(ptr).filter(|v| !v.is_null())
}

fn read_u64(cfg: &Value, ptr: &str, default: u64) -> Result<u64> {
    match present(cfg, ptr) {
        None => Ok(default),
        Some(v) => v
            .as_u64()
            .with_context(|| format!("{ptr} must be a non-negative integer, got {v}")),
    }
}

fn read_f64(cfg: &Value, ptr: &str, default: f64) -> Result<f64> {
    match present(cfg, ptr) {
        None => Ok(default),
        Some(v) => v.as_f64().with_context(|| format!("{ptr} must be a number, got {v}")),
    }
}

fn read_bool(cfg: &Value, ptr: &str, default: bool) -> Result<bool> {
    match present(cfg, ptr) {
        None => Ok(default),
        Some(v) => v.as_bool().with_context(|| format!("{ptr} must be a boolean, got {v}")),
    }
}
