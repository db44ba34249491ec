use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tmon_config::{report_unused_keys, MonitorConfig, OutputConfig, PolicyConfig, UnusedKeyPolicy};
use tmon_policies::PolicyParams;
use tmon_runtime::{replay, Monitor, ReplaySummary, RuleVerdict, VerdictSink};
use tmon_sink::{VerdictLog, VerifyResult};
use tracing::{info, warn};

/// Records fed between two flushes; bounds the verdict outbox on long traces.
const FLUSH_EVERY: usize = 1024;

pub struct ReplayArgs {
    pub trace: PathBuf,
    pub config_paths: Vec<PathBuf>,
    pub policies: Vec<String>,
    pub out: Option<PathBuf>,
    pub fail_on_unused_keys: bool,
}

/// Counts what reaches the output and forwards it to the log, if any.
struct ReportSink {
    log: Option<VerdictLog>,
    delivered: u64,
    holding: u64,
}

impl VerdictSink for ReportSink {
    fn deliver(&mut self, verdict: &RuleVerdict) -> Result<()> {
        if let Some(log) = self.log.as_mut() {
            log.append(verdict)?;
        }
        self.delivered += 1;
        if verdict.holds() {
            self.holding += 1;
        }
        Ok(())
    }
}

pub fn run(args: ReplayArgs) -> Result<()> {
    let loaded = tmon_config::load_layered_yaml(&args.config_paths)?;
    let unused_policy = if args.fail_on_unused_keys {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let report = report_unused_keys(&loaded.config_json, unused_policy)?;
    for pointer in &report.unused_leaf_pointers {
        warn!(%pointer, "config/unused-key");
    }

    let monitor_cfg = MonitorConfig::from_json(&loaded.config_json)?;
    let output_cfg = OutputConfig::from_json(&loaded.config_json)?;
    let policy_cfg = PolicyConfig::from_json(&loaded.config_json)?;
    let params = PolicyParams {
        anomaly_window_secs: policy_cfg.anomaly_window_secs,
        anomaly_threshold_factor: policy_cfg.anomaly_threshold_factor,
        finalization_deadline_secs: policy_cfg.finalization_deadline_secs,
    };

    let registry = tmon_policies::builtin_registry();
    let selected: Vec<String> = if args.policies.is_empty() {
        registry.list().iter().map(|m| m.name.clone()).collect()
    } else {
        args.policies.clone()
    };

    let mut monitor = Monitor::new(
        tmon_policies::signature(),
        monitor_cfg.to_settings(&output_cfg)?,
    );
    for name in &selected {
        let expr = registry
            .instantiate(name, &params)
            .with_context(|| format!("policy '{name}'"))?;
        monitor
            .register(name, &expr)
            .with_context(|| format!("compile policy '{name}'"))?;
    }

    let records = tmon_runtime::load_trace(&args.trace, monitor.signature())?;
    info!(config_hash = %loaded.config_hash, records = records.len(), "replay/start");

    let mut sink = ReportSink {
        log: match &args.out {
            Some(path) => Some(open_log(path, output_cfg.hash_chain)?),
            None => None,
        },
        delivered: 0,
        holding: 0,
    };

    let mut summary = ReplaySummary::default();
    for chunk in records.chunks(FLUSH_EVERY) {
        let part = replay(&mut monitor, chunk.iter());
        summary.facts_accepted += part.facts_accepted;
        summary.facts_rejected += part.facts_rejected;
        summary.watermarks += part.watermarks;
        monitor.flush(&mut sink)?;
    }
    monitor.finish();
    monitor.flush(&mut sink)?;

    println!("config_hash={}", loaded.config_hash);
    println!("facts_accepted={}", summary.facts_accepted);
    println!("facts_rejected={}", summary.facts_rejected);
    println!("watermarks={}", summary.watermarks);
    println!("time_points={}", monitor.time_points());
    println!("verdicts={}", sink.delivered);
    println!("violations={}", sink.holding);
    for stats in monitor.all_stats() {
        println!(
            "rule={} state={} sealed={} emitted={} degraded={}",
            stats.name, stats.state, stats.time_points_sealed, stats.verdicts_emitted, stats.degraded
        );
    }
    if let Some(log) = &sink.log {
        println!("out={}", log.path().display());
        if let Some(h) = log.last_hash() {
            println!("last_hash={h}");
        }
    }
    Ok(())
}

/// Opens `path` for appending, continuing the chain of an existing log.
fn open_log(path: &Path, hash_chain: bool) -> Result<VerdictLog> {
    let mut log = VerdictLog::new(path, hash_chain)?;
    if !path.exists() {
        return Ok(log);
    }
    match tmon_sink::verify_hash_chain(path)? {
        VerifyResult::Valid { .. } => {}
        VerifyResult::Broken { line, reason } => {
            bail!("refusing to append to {:?}: chain broken at line {line}: {reason}", path)
        }
    }
    let existing = tmon_sink::read_log(path)?;
    let last_hash = existing.last().and_then(|r| r.hash_self.clone());
    log.resume(existing.len() as u64, last_hash);
    Ok(log)
}
