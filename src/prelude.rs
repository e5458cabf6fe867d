//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use differential_harness::prelude::*;
//! ```

// Core
pub use crate::core::config::HarnessConfig;
pub use crate::core::errors::{HarnessError, Result};

// Parameters
pub use crate::params::{ArgumentSet, ArgumentSetGenerator, ParameterSpec, ValueSource};

// Drivers
pub use crate::driver::{
    CommandDriver, CommandProgram, CommandSpec, Driver, DriverData, DriverFailure, DriverSettings,
    DriverType, FnDriver, OutputFormat,
};

// Comparison
pub use crate::compare::{Comparator, ComparatorFailure, Equality, FnComparator, NumericTolerance};
pub use crate::hacks::{Action, Rule};

// Run loop
pub use crate::regression::{RegressionRunner, RunAborted, RunOptions, TestCase, Throttle, run};

// Tracking and logging
pub use crate::logger::{EventSink, JsonlConfig, JsonlWriter, MemorySink};
pub use crate::tracker::{Outcome, OutcomeStatus, ReportOptions, ResultTracker};
