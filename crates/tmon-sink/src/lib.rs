//! tmon-sink
//!
//! Append-only JSONL verdict log. One verdict per line, keys sorted, with an
//! optional SHA-256 hash chain (`hash_prev` / `hash_self`) so a stored log can
//! be checked for tampering after the fact.
//!
//! Records carry no wall-clock time: replaying the same trace produces the
//! same file byte for byte.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tmon_runtime::{RuleVerdict, VerdictSink};
use uuid::Uuid;

/// Namespace for deterministic verdict record ids.
const EVENT_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6d, 0x6f, 0x6e, 0x69, 0x74, 0x6f, 0x72, 0x2d, 0x76, 0x65, 0x72, 0x64, 0x69, 0x63, 0x74, 0x73,
]);

pub struct VerdictLog {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Number of records appended; the next record's `seq`.
    seq: u64,
}

impl VerdictLog {
    /// Creates the log writer and ensures parent dirs exist. Appends to an
    /// existing file; use [`VerdictLog::resume`] to continue its chain.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }
        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Continue after `records` already written, the last one hashing to `last_hash`.
    pub fn resume(&mut self, records: u64, last_hash: Option<String>) {
        self.seq = records;
        self.last_hash = last_hash;
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, verdict: &RuleVerdict) -> Result<VerdictRecord> {
        let payload = serde_json::to_value(verdict).context("serialize verdict failed")?;
        let event_id = derive_event_id(self.last_hash.as_deref(), &payload, self.seq)?;

        let mut record = VerdictRecord {
            event_id,
            seq: self.seq,
            verdict: payload,
            hash_prev: None,
            hash_self: None,
        };
        if self.hash_chain {
            record.hash_prev = self.last_hash.clone();
            let self_hash = compute_record_hash(&record)?;
            record.hash_self = Some(self_hash.clone());
            self.last_hash = Some(self_hash);
        }

        append_line(&self.path, &canonical_json_line(&record)?)?;
        self.seq += 1;
        Ok(record)
    }
}

impl VerdictSink for VerdictLog {
    fn deliver(&mut self, verdict: &RuleVerdict) -> Result<()> {
        self.append(verdict).map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub event_id: Uuid,
    pub seq: u64,
    /// The serialized [`RuleVerdict`].
    pub verdict: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

impl VerdictRecord {
    pub fn decode_verdict(&self) -> Result<RuleVerdict> {
        serde_json::from_value(self.verdict.clone()).context("decode verdict payload")
    }
}

/// UUID v5 over chain state, canonical payload and sequence number. Same
/// inputs, same id; no RNG.
pub fn derive_event_id(last_hash: Option<&str>, payload: &Value, seq: u64) -> Result<Uuid> {
    let canonical = canonical_json_line(payload)?;
    let name = format!("{}|{}|{}", last_hash.unwrap_or(""), canonical, seq);
    Ok(Uuid::new_v5(&EVENT_ID_NAMESPACE, name.as_bytes()))
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open verdict log {:?}", path))?;
    f.write_all(line.as_bytes()).context("write verdict line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

/// Compact JSON with object keys sorted recursively.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize verdict record failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for k in keys {
                sorted.insert(k.clone(), sort_keys(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Hash of the canonical record without `hash_self`.
pub fn compute_record_hash(record: &VerdictRecord) -> Result<String> {
    let mut unsealed = record.clone();
    unsealed.hash_self = None;
    let canonical = canonical_json_line(&unsealed)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    /// First line (1-based) where the chain does not hold.
    Broken { line: usize, reason: String },
}

pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read verdict log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Check `hash_prev` linkage and recompute every `hash_self`. A log written
/// without hash chain verifies as long as no line claims a hash.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut lines = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: VerdictRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("parse verdict record at line {}", i + 1))?;
        lines += 1;

        if record.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, record.hash_prev
                ),
            });
        }
        if let Some(claimed) = &record.hash_self {
            let recomputed = compute_record_hash(&record)?;
            if *claimed != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
                });
            }
        }
        prev_hash = record.hash_self;
    }

    Ok(VerifyResult::Valid { lines })
}

/// Read every record of a log, in file order.
pub fn read_log(path: impl AsRef<Path>) -> Result<Vec<VerdictRecord>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read verdict log {:?}", path.as_ref()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            serde_json::from_str(l).with_context(|| format!("parse verdict record at line {}", i + 1))
        })
        .collect()
}
