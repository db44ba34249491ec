//! Deterministic trace generation. Same seed, same trace, on every platform.

use tmon_schemas::{Database, Fact, Signature, TimePoint, Value, ValueType};

/// SplitMix64: tiny, fast, good enough for test data.
#[derive(Debug, Clone)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Uniform-ish in `0..n`; `n` must be non-zero.
    pub fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TraceShape {
    pub time_points: usize,
    /// Gap between consecutive timestamps, drawn from `1..=max_gap`.
    pub max_gap: u64,
    /// Facts drawn per time point, from `0..=max_facts`.
    pub max_facts: usize,
    /// Integer field values are drawn from `0..domain`.
    pub domain: i64,
}

impl Default for TraceShape {
    fn default() -> Self {
        Self {
            time_points: 30,
            max_gap: 3,
            max_facts: 3,
            domain: 4,
        }
    }
}

/// `p(x)`, `q(x)`, `r(x, y)`, all integer fields.
pub fn small_signature() -> Signature {
    Signature::new()
        .with_relation("p", &[("x", ValueType::Int)])
        .with_relation("q", &[("x", ValueType::Int)])
        .with_relation("r", &[("x", ValueType::Int), ("y", ValueType::Int)])
}

/// Random trace over the integer relations of `signature`, strictly
/// increasing timestamps starting at 0. Relations with non-integer fields
/// are skipped.
pub fn random_trace(seed: u64, signature: &Signature, shape: TraceShape) -> Vec<TimePoint> {
    let mut rng = SplitMix64::new(seed);
    let relations: Vec<(&str, usize)> = signature
        .relations()
        .filter(|r| r.fields.iter().all(|f| f.ty == ValueType::Int))
        .map(|r| (r.name.as_str(), r.arity()))
        .collect();

    let mut ts = 0;
    let mut trace = Vec::with_capacity(shape.time_points);
    for i in 0..shape.time_points {
        if i > 0 {
            ts += 1 + rng.below(shape.max_gap.max(1));
        }
        let mut db = Database::new();
        if !relations.is_empty() {
            for _ in 0..rng.below(shape.max_facts as u64 + 1) {
                let (name, arity) = relations[rng.below(relations.len() as u64) as usize];
                let fields = (0..arity)
                    .map(|_| Value::Int(rng.below(shape.domain.max(1) as u64) as i64))
                    .collect();
                db.insert(name, fields);
            }
        }
        trace.push(TimePoint::new(ts, db));
    }
    trace
}

/// Flatten a trace into facts in submission order. Empty time points vanish,
/// so callers that need them should `tick` their timestamps as well.
pub fn facts_of(trace: &[TimePoint], signature: &Signature) -> Vec<Fact> {
    trace
        .iter()
        .flat_map(|tp| {
            signature.relations().flat_map(move |r| {
                tp.db
                    .tuples(&r.name)
                    .map(move |t| Fact::new(r.name.clone(), t.clone(), tp.ts))
            })
        })
        .collect()
}
