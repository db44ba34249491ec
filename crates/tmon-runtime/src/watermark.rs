//! Input watermark.
//!
//! # Purpose
//!
//! Evaluation is only sound on a monotone trace. This module tracks the
//! lowest timestamp a fact may still carry and rejects anything older
//! instead of buffering it.
//!
//! # Invariants
//!
//! - **Non-decreasing**: the watermark only moves forward.
//! - **Facts at the watermark are fresh**: several facts may share one
//!   timestamp; only strictly older facts are late.
//! - **Rejection does not move the watermark.**

use tmon_schemas::{Ts, TS_END};

// ---------------------------------------------------------------------------
// Freshness decision
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FactFreshness {
    /// Timestamp is at or above the watermark.
    Fresh,
    /// Timestamp is strictly below the watermark.
    Late { watermark: Ts, got: Ts },
}

impl FactFreshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, FactFreshness::Fresh)
    }
}

// ---------------------------------------------------------------------------
// Watermark
// ---------------------------------------------------------------------------

/// "Every fact with a timestamp below `current` has been submitted."
#[derive(Clone, Debug, Default)]
pub struct InputWatermark {
    current: Ts,
}

impl InputWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only freshness probe.
    pub fn check(&self, ts: Ts) -> FactFreshness {
        if ts < self.current {
            FactFreshness::Late {
                watermark: self.current,
                got: ts,
            }
        } else {
            FactFreshness::Fresh
        }
    }

    /// Check `ts` and, when fresh, move the watermark up to it.
    pub fn accept(&mut self, ts: Ts) -> FactFreshness {
        let result = self.check(ts);
        if result.is_fresh() {
            self.current = ts;
        }
        result
    }

    /// Move the watermark to `ts`. Returns false (and changes nothing) when
    /// `ts` is not ahead of the current watermark.
    pub fn advance_to(&mut self, ts: Ts) -> bool {
        if ts <= self.current {
            return false;
        }
        self.current = ts;
        true
    }

    pub fn current(&self) -> Ts {
        self.current
    }

    /// The trace is complete.
    pub fn is_closed(&self) -> bool {
        self.current == TS_END
    }
}
