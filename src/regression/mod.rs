//! Orchestration: test case descriptors and the oracle-vs-SUT run loop.

#![allow(missing_docs)]

pub mod runner;
pub mod throttle;

use std::fmt;
use std::sync::Arc;

use crate::compare::Comparator;
use crate::core::errors::{HarnessError, Result};
use crate::driver::DriverType;
use crate::params::ArgumentSetGenerator;
use crate::tracker::ResultTracker;

pub use runner::{RegressionRunner, RunAborted, RunOptions};
pub use throttle::Throttle;

/// One comparator, one oracle, one or more systems under test.
#[derive(Clone)]
pub struct TestCase {
    comparator: Arc<dyn Comparator>,
    oracle: DriverType,
    suts: Vec<DriverType>,
}

impl TestCase {
    pub fn new<C>(comparator: C, oracle: DriverType, suts: Vec<DriverType>) -> Result<Self>
    where
        C: Comparator + 'static,
    {
        Self::with_shared(Arc::new(comparator), oracle, suts)
    }

    /// Like [`TestCase::new`] with a comparator shared between cases.
    pub fn with_shared(
        comparator: Arc<dyn Comparator>,
        oracle: DriverType,
        suts: Vec<DriverType>,
    ) -> Result<Self> {
        if suts.is_empty() {
            return Err(HarnessError::InvalidConfig {
                details: format!("test case with oracle {} has no SUT driver", oracle.name()),
            });
        }
        Ok(Self {
            comparator,
            oracle,
            suts,
        })
    }

    #[must_use]
    pub fn comparator(&self) -> &dyn Comparator {
        self.comparator.as_ref()
    }

    #[must_use]
    pub const fn oracle(&self) -> &DriverType {
        &self.oracle
    }

    #[must_use]
    pub fn suts(&self) -> &[DriverType] {
        &self.suts
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("comparator", &self.comparator.name())
            .field("oracle", &self.oracle.name())
            .field(
                "suts",
                &self.suts.iter().map(DriverType::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Run with default options: no settings, no rules, panics caught, no
/// timeouts, no log.
pub fn run(
    generator: &ArgumentSetGenerator,
    test_cases: &[TestCase],
) -> std::result::Result<ResultTracker, RunAborted> {
    RegressionRunner::new(RunOptions::default()).run(generator, test_cases)
}
