//! Counters collected during a run.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Raw per-driver accumulators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverCounters {
    pub calls: u64,
    pub bailouts: u64,
    pub failures: u64,
    pub duration: Duration,
    pub overhead: Duration,
    /// Rewriting rules matched while this driver was the oracle.
    pub ohacks: u64,
    /// Rewriting rules matched while this driver was the SUT.
    pub rhacks: u64,
}

impl DriverCounters {
    #[must_use]
    pub fn summary(&self) -> DriverStats {
        let per_call = |total: Duration| {
            (self.calls > 0).then(|| duration_ms(total) / self.calls)
        };
        DriverStats {
            calls: self.calls,
            bailouts: self.bailouts,
            failures: self.failures,
            duration_ms: duration_ms(self.duration),
            overhead_ms: duration_ms(self.overhead),
            duration_per_call_ms: per_call(self.duration),
            overhead_per_call_ms: per_call(self.overhead),
            ohacks: self.ohacks,
            rhacks: self.rhacks,
        }
    }
}

/// Serializable per-driver summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverStats {
    pub calls: u64,
    pub bailouts: u64,
    pub failures: u64,
    pub duration_ms: u64,
    pub overhead_ms: u64,
    pub duration_per_call_ms: Option<u64>,
    pub overhead_per_call_ms: Option<u64>,
    pub ohacks: u64,
    pub rhacks: u64,
}

/// Snapshot of a run's statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub argsets: u64,
    pub tests_done: u64,
    pub passed: u64,
    pub mismatched: u64,
    pub errored: u64,
    pub skipped: u64,
    pub total_errors: u64,
    pub distinct_errors: u64,
    pub duration_ms: u64,
    /// Time spent in the `on_next` hook.
    pub on_next_ms: u64,
    /// Time spent waiting on the throttle.
    pub throttled_ms: u64,
    pub hacks: u64,
    pub hacked_cases: u64,
    /// Percentage of compared cases touched by a rewriting rule.
    pub cases_hacked_pct: Option<f64>,
    pub aborted: bool,
    pub drivers: BTreeMap<String, DriverStats>,
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
