//! Per-pairing outcome records.

#![allow(missing_docs)]

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compare::ComparatorFailure;
use crate::driver::{DriverData, DriverFailure};
use crate::params::ArgumentSet;

/// Verdict for one (argument set, test case, SUT driver) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pass,
    Mismatch,
    OracleExtractionError,
    SutExtractionError,
    ComparatorError,
    /// A driver declared it cannot handle the argument set.
    Skipped,
}

impl OutcomeStatus {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Mismatch => "mismatch",
            Self::OracleExtractionError => "oracle_error",
            Self::SutExtractionError => "sut_error",
            Self::ComparatorError => "comparator_error",
            Self::Skipped => "skipped",
        }
    }

    /// Anything but a pass or a bailout.
    #[must_use]
    pub const fn is_error(self) -> bool {
        !matches!(self, Self::Pass | Self::Skipped)
    }

    /// Errors other than plain mismatches.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            Self::OracleExtractionError | Self::SutExtractionError | Self::ComparatorError
        )
    }
}

/// Why an outcome is not a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeDetail {
    /// Both snapshots as compared (after rewriting rules) and their diff.
    Mismatch {
        oracle: DriverData,
        sut: DriverData,
        diff: String,
    },
    Driver {
        driver: String,
        failure: DriverFailure,
    },
    Comparator {
        comparator: String,
        failure: ComparatorFailure,
    },
    Bailout {
        driver: String,
        bailout: String,
    },
}

/// One entry of the tracker.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Zero-based position of the argument set in the run.
    pub argset_index: u64,
    pub argset: ArgumentSet,
    /// Zero-based position of the test case.
    pub test_case: usize,
    pub oracle: String,
    pub sut: String,
    pub status: OutcomeStatus,
    pub detail: Option<OutcomeDetail>,
    pub oracle_elapsed: Option<Duration>,
    pub sut_elapsed: Option<Duration>,
}

impl Outcome {
    #[must_use]
    pub fn new(
        argset_index: u64,
        argset: ArgumentSet,
        test_case: usize,
        oracle: impl Into<String>,
        sut: impl Into<String>,
        status: OutcomeStatus,
    ) -> Self {
        Self {
            argset_index,
            argset,
            test_case,
            oracle: oracle.into(),
            sut: sut.into(),
            status,
            detail: None,
            oracle_elapsed: None,
            sut_elapsed: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: OutcomeDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    #[must_use]
    pub fn with_timing(mut self, oracle: Option<Duration>, sut: Option<Duration>) -> Self {
        self.oracle_elapsed = oracle;
        self.sut_elapsed = sut;
        self
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.status.is_error()
    }

    /// Deterministic error text used to group outcomes. Contains no timings,
    /// so equal failures on different argument sets collapse together.
    #[must_use]
    pub fn error_string(&self) -> Option<String> {
        if !self.is_error() {
            return None;
        }
        let text = match &self.detail {
            Some(OutcomeDetail::Mismatch { diff, .. }) => diff.clone(),
            Some(OutcomeDetail::Driver { driver, failure }) => {
                let side = if self.status == OutcomeStatus::OracleExtractionError {
                    "oracle"
                } else {
                    "sut"
                };
                format!(
                    "{side} driver {driver} failed ({}): {failure}",
                    failure.kind()
                )
            }
            Some(OutcomeDetail::Comparator {
                comparator,
                failure,
            }) => format!(
                "comparator {comparator} on {} vs {}: {failure}",
                self.oracle, self.sut
            ),
            Some(OutcomeDetail::Bailout { .. }) | None => format!(
                "{} for {} vs {}",
                self.status.label(),
                self.oracle,
                self.sut
            ),
        };
        Some(text)
    }
}
