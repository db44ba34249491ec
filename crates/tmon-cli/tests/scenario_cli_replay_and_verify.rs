//! End-to-end `tmon` runs.
//!
//! GREEN when:
//! - `replay` reports accepted/rejected counts, verdicts and violations for a
//!   finalization-latency trace, and writes a hash-chained log.
//! - `verify-log` accepts that log and fails once a line is edited.
//! - A second replay into the same log continues its chain.
//! - Unknown policies and unused config keys under `--unused-keys fail` abort.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;

const TRACE: &str = r#"# moved at 100/200/300, only 1 delivered in time
{"ts": 100, "rel": "proposal_moved", "args": ["r", "s1", "01"]}
{"ts": 200, "rel": "proposal_moved", "args": ["r", "s1", "02"]}
{"ts": 300, "rel": "proposal_moved", "args": ["r", "s1", "03"]}
{"ts": 500, "rel": "batch_delivered", "args": ["r", "s1", "01"]}
{"ts": 50, "rel": "batch_delivered", "args": ["r", "s1", "02"]}
{"ts": 600, "rel": "batch_delivered", "args": ["r", "s1"]}
{"watermark": 800}
{"ts": 901, "rel": "batch_delivered", "args": ["r", "s1", "03"]}
"#;

fn tmon() -> Command {
    let mut cmd = Command::cargo_bin("tmon").expect("tmon binary");
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn write(dir: &Path, name: &str, content: &str) -> String {
    let p = dir.join(name);
    fs::write(&p, content).unwrap();
    p.to_string_lossy().to_string()
}

#[test]
fn replay_writes_verifiable_log() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let trace = write(dir.path(), "trace.jsonl", TRACE);
    let out = dir.path().join("verdicts.jsonl");
    let out_s = out.to_string_lossy().to_string();

    tmon()
        .args(["replay", "--trace", &trace, "--policy", "finalization_latency", "--out", &out_s])
        .assert()
        .success()
        .stdout(predicate::str::contains("facts_accepted=5"))
        .stdout(predicate::str::contains("facts_rejected=2"))
        .stdout(predicate::str::contains("watermarks=1"))
        .stdout(predicate::str::contains("time_points=5"))
        .stdout(predicate::str::contains("verdicts=5"))
        .stdout(predicate::str::contains("violations=2"))
        .stdout(predicate::str::contains(
            "rule=finalization_latency state=closed sealed=5 emitted=5 degraded=false",
        ));

    assert_eq!(fs::read_to_string(&out)?.lines().count(), 5);

    tmon()
        .args(["verify-log", "--path", &out_s])
        .assert()
        .success()
        .stdout(predicate::str::contains("chain_valid=true lines=5"));

    // Appending a second run continues the chain.
    tmon()
        .args(["replay", "--trace", &trace, "--policy", "finalization_latency", "--out", &out_s])
        .assert()
        .success();
    tmon()
        .args(["verify-log", "--path", &out_s])
        .assert()
        .success()
        .stdout(predicate::str::contains("chain_valid=true lines=10"));

    let content = fs::read_to_string(&out)?;
    let tampered = content.replacen("\"ts\":200", "\"ts\":201", 1);
    assert_ne!(content, tampered);
    fs::write(&out, tampered)?;
    tmon()
        .args(["verify-log", "--path", &out_s])
        .assert()
        .failure()
        .stdout(predicate::str::contains("chain_valid=false line=2"));
    Ok(())
}

#[test]
fn violations_only_config_filters_output() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let trace = write(dir.path(), "trace.jsonl", TRACE);
    let cfg = write(dir.path(), "cfg.yaml", "output:\n  violations_only: true\n");

    tmon()
        .args(["replay", "--trace", &trace, "--config", &cfg, "--policy", "finalization_latency"])
        .assert()
        .success()
        .stdout(predicate::str::contains("verdicts=2"))
        .stdout(predicate::str::contains("violations=2"));
    Ok(())
}

#[test]
fn unknown_policy_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let trace = write(dir.path(), "trace.jsonl", TRACE);
    tmon()
        .args(["replay", "--trace", &trace, "--policy", "no_such_policy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no_such_policy"));
    Ok(())
}

#[test]
fn unused_keys_fail_when_requested() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let trace = write(dir.path(), "trace.jsonl", TRACE);
    let cfg = write(dir.path(), "cfg.yaml", "monitor:\n  paralel_rules: false\n");

    tmon()
        .args(["replay", "--trace", &trace, "--config", &cfg, "--unused-keys", "fail"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_UNUSED_KEYS"));

    tmon()
        .args(["replay", "--trace", &trace, "--config", &cfg])
        .assert()
        .success();
    Ok(())
}

#[test]
fn policies_and_config_hash_print_key_values() -> anyhow::Result<()> {
    tmon()
        .arg("policies")
        .assert()
        .success()
        .stdout(predicate::str::contains("policy=anomaly version=1.0.0"))
        .stdout(predicate::str::contains("policy=finalization_latency"));

    let dir = tempfile::tempdir()?;
    let a = write(dir.path(), "a.yaml", "output:\n  hash_chain: true\n");
    let b = write(dir.path(), "b.yaml", "output:\n  hash_chain: false\n");
    tmon()
        .args(["config-hash", &a, &b])
        .assert()
        .success()
        .stdout(predicate::str::contains("config_hash="))
        .stdout(predicate::str::contains(r#"{"output":{"hash_chain":false}}"#));
    Ok(())
}
