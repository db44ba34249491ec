//! Verdict log hash chain.
//!
//! GREEN when:
//! - Five verdicts written with hash chain verify as Valid { lines: 5 }.
//! - Editing the payload of line 3 is reported as Broken at line 3.
//! - Dropping a line breaks the linkage at the line after the gap.
//! - Two logs written from the same verdicts are byte-identical.

use std::fs;
use std::path::Path;
use tmon_runtime::{Outcome, RuleHandle, RuleVerdict, VerdictSink};
use tmon_sink::{read_log, verify_hash_chain, verify_hash_chain_str, VerdictLog, VerifyResult};

fn verdict(index: u64, holds: bool) -> RuleVerdict {
    RuleVerdict {
        rule: RuleHandle(1),
        rule_name: "finalization_latency".to_string(),
        index,
        ts: 100 * (index + 1),
        outcome: Outcome::Boolean { holds },
        degraded: false,
    }
}

fn write_log(path: &Path, hash_chain: bool) {
    let mut log = VerdictLog::new(path, hash_chain).unwrap();
    for i in 0..5 {
        log.deliver(&verdict(i, i % 2 == 0)).unwrap();
    }
    assert_eq!(log.seq(), 5);
}

#[test]
fn untampered_chain_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out/verdicts.jsonl");
    write_log(&path, true);
    assert_eq!(verify_hash_chain(&path).unwrap(), VerifyResult::Valid { lines: 5 });

    let records = read_log(&path).unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records[2].decode_verdict().unwrap(), verdict(2, true));
    assert_eq!(records[1].hash_prev, records[0].hash_self);
}

#[test]
fn edited_payload_is_detected_at_its_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("verdicts.jsonl");
    write_log(&path, true);

    let content = fs::read_to_string(&path).unwrap();
    let tampered: Vec<String> = content
        .lines()
        .enumerate()
        .map(|(i, l)| {
            if i == 2 {
                l.replace(r#""holds":true"#, r#""holds":false"#)
            } else {
                l.to_string()
            }
        })
        .collect();
    let result = verify_hash_chain_str(&tampered.join("\n")).unwrap();
    assert!(
        matches!(result, VerifyResult::Broken { line: 3, .. }),
        "got {result:?}"
    );
}

#[test]
fn dropped_line_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("verdicts.jsonl");
    write_log(&path, true);

    let content = fs::read_to_string(&path).unwrap();
    let gap: Vec<&str> = content
        .lines()
        .enumerate()
        .filter(|(i, _)| *i != 1)
        .map(|(_, l)| l)
        .collect();
    let result = verify_hash_chain_str(&gap.join("\n")).unwrap();
    assert!(matches!(result, VerifyResult::Broken { line: 2, .. }), "got {result:?}");
}

#[test]
fn logs_are_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.jsonl");
    let b = dir.path().join("b.jsonl");
    write_log(&a, true);
    write_log(&b, true);
    assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
}

#[test]
fn unchained_log_has_no_hashes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.jsonl");
    write_log(&path, false);
    let records = read_log(&path).unwrap();
    assert!(records.iter().all(|r| r.hash_self.is_none() && r.hash_prev.is_none()));
    assert_eq!(verify_hash_chain(&path).unwrap(), VerifyResult::Valid { lines: 5 });
}
