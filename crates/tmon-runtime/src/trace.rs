//! JSONL trace files.
//!
//! One JSON object per line, either a fact
//! `{"ts": 100, "rel": "node_added", "args": ["n1", "s1"]}` or a watermark
//! `{"watermark": 700}`. Timestamps are seconds or RFC3339 strings. Arguments
//! are typed by the signature; anything that does not fit is converted
//! loosely so the monitor can reject it with a precise `InputError`.

use crate::monitor::Monitor;
use anyhow::{anyhow, bail, Context, Result};
use chrono::DateTime;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tmon_schemas::{Fact, Signature, Ts, Value, ValueType};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub enum TraceRecord {
    Fact(Fact),
    Watermark(Ts),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTs {
    Secs(u64),
    Rfc3339(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecord {
    Watermark {
        watermark: RawTs,
    },
    Fact {
        ts: RawTs,
        rel: String,
        #[serde(default)]
        args: Vec<serde_json::Value>,
    },
}

fn to_ts(raw: RawTs) -> Result<Ts> {
    match raw {
        RawTs::Secs(s) => Ok(s),
        RawTs::Rfc3339(s) => {
            let dt = DateTime::parse_from_rfc3339(&s)
                .with_context(|| format!("parse RFC3339 timestamp {s:?}"))?;
            u64::try_from(dt.timestamp())
                .map_err(|_| anyhow!("timestamp {s:?} is before the unix epoch"))
        }
    }
}

/// Parse one line. Blank lines and lines starting with `#` yield `None`.
pub fn parse_trace_line(line: &str, signature: &Signature) -> Result<Option<TraceRecord>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let raw: RawRecord = serde_json::from_str(trimmed).context("parse trace record")?;
    let record = match raw {
        RawRecord::Watermark { watermark } => TraceRecord::Watermark(to_ts(watermark)?),
        RawRecord::Fact { ts, rel, args } => {
            let declared = signature.relation(&rel).map(|r| r.fields.as_slice()).unwrap_or(&[]);
            let fields = args
                .iter()
                .enumerate()
                .map(|(i, raw)| match declared.get(i) {
                    Some(field) => typed_value(raw, field.ty).or_else(|_| loose_value(raw)),
                    None => loose_value(raw),
                })
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("arguments of '{rel}'"))?;
            TraceRecord::Fact(Fact::new(rel, fields, to_ts(ts)?))
        }
    };
    Ok(Some(record))
}

fn typed_value(raw: &serde_json::Value, ty: ValueType) -> Result<Value> {
    let mismatch = || anyhow!("expected {ty}, got {raw}");
    match ty {
        ValueType::Int => raw.as_i64().map(Value::Int).ok_or_else(mismatch),
        ValueType::Float => raw.as_f64().map(Value::Float).ok_or_else(mismatch),
        ValueType::Str => raw.as_str().map(Value::str).ok_or_else(mismatch),
        ValueType::Principal => raw.as_str().map(Value::principal).ok_or_else(mismatch),
        ValueType::Bytes => {
            let s = raw.as_str().ok_or_else(mismatch)?;
            let digits = s.strip_prefix("0x").unwrap_or(s);
            Ok(Value::Bytes(hex::decode(digits).context("decode hex bytes")?))
        }
    }
}

fn loose_value(raw: &serde_json::Value) -> Result<Value> {
    if let Some(i) = raw.as_i64() {
        return Ok(Value::Int(i));
    }
    if let Some(f) = raw.as_f64() {
        return Ok(Value::Float(f));
    }
    if let Some(s) = raw.as_str() {
        return Ok(Value::str(s));
    }
    bail!("unsupported argument {raw}")
}

/// Parse a whole trace file. Malformed lines fail with their line number.
pub fn load_trace(path: impl AsRef<Path>, signature: &Signature) -> Result<Vec<TraceRecord>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).with_context(|| format!("read trace {:?}", path))?;
    let mut records = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if let Some(record) = parse_trace_line(line, signature)
            .with_context(|| format!("trace {:?} line {}", path, i + 1))?
        {
            records.push(record);
        }
    }
    Ok(records)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub facts_accepted: u64,
    pub facts_rejected: u64,
    pub watermarks: u64,
}

/// Feed records into `monitor` in order. Rejected facts are counted and skipped.
pub fn replay<'a>(
    monitor: &mut Monitor,
    records: impl IntoIterator<Item = &'a TraceRecord>,
) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    for record in records {
        match record {
            TraceRecord::Fact(fact) => match monitor.submit(fact.clone()) {
                Ok(()) => summary.facts_accepted += 1,
                Err(_) => summary.facts_rejected += 1,
            },
            TraceRecord::Watermark(w) => {
                monitor.advance_watermark(*w);
                summary.watermarks += 1;
            }
        }
    }
    info!(
        accepted = summary.facts_accepted,
        rejected = summary.facts_rejected,
        watermarks = summary.watermarks,
        "trace/replayed"
    );
    summary
}
