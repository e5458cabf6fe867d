//! Driver abstraction: uniform, lazily evaluated wrappers around the systems
//! being compared.
//!
//! A concrete driver implements only [`Driver::extract`]. A [`DriverType`] is
//! the constructor the orchestrator holds; it creates one fresh
//! [`DriverInstance`] per argument set, and the instance supplies validation,
//! memoization, timing, panic capture and the optional timeout around the
//! extraction.

#![allow(missing_docs)]

pub mod command;
pub mod func;
pub mod instance;
pub mod settings;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::params::ArgumentSet;

pub use command::{CommandDriver, CommandProgram, CommandSpec, OutputFormat};
pub use func::FnDriver;
pub use instance::DriverInstance;
pub use settings::DriverSettings;

/// Named output fields produced by one extraction.
pub type DriverData = BTreeMap<String, Value>;

/// Why a driver could not produce data. Recorded in outcomes, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverFailure {
    #[error("missing argument `{name}`")]
    MissingArg { name: String },

    #[error("missing setting `{name}`")]
    MissingSetting { name: String },

    #[error("extraction failed: {message}")]
    Extraction { message: String },

    #[error("{stage} failed: {message}")]
    Data {
        stage: &'static str,
        message: String,
    },

    #[error("driver panicked: {message}")]
    Panicked { message: String },

    #[error("extraction exceeded {limit_ms} ms")]
    TimedOut { limit_ms: u64 },
}

impl DriverFailure {
    pub fn extraction(message: impl fmt::Display) -> Self {
        Self::Extraction {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn timed_out(limit: Duration) -> Self {
        Self::TimedOut {
            limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Short machine label for logs and stats.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingArg { .. } => "missing_arg",
            Self::MissingSetting { .. } => "missing_setting",
            Self::Extraction { .. } => "extraction",
            Self::Data { .. } => "data",
            Self::Panicked { .. } => "panicked",
            Self::TimedOut { .. } => "timed_out",
        }
    }
}

/// The system-specific part of a driver.
///
/// Hooks run in the order `extract`, `decode`, `normalize`, `check`. Hook
/// errors are reported as [`DriverFailure::Data`] naming the stage. Fields
/// whose name starts with `_` survive until `check` and are then dropped, so
/// drivers can carry raw material for checking without it reaching the
/// comparator.
pub trait Driver: Send {
    /// Do the real work for one argument set.
    fn extract(
        &mut self,
        args: &ArgumentSet,
        settings: &DriverSettings,
    ) -> Result<DriverData, DriverFailure>;

    /// Decode raw data as brought by `extract`.
    fn decode(&mut self, _data: &mut DriverData) -> Result<(), String> {
        Ok(())
    }

    /// Prepare data for comparison (sort, trim, split...).
    fn normalize(&mut self, _data: &mut DriverData) -> Result<(), String> {
        Ok(())
    }

    /// Early detection of bad data.
    fn check(&self, _data: &DriverData) -> Result<(), String> {
        Ok(())
    }

    /// Duration measured by the driver itself, when wall time around
    /// `extract` would include unrelated overhead.
    fn measured_duration(&self) -> Option<Duration> {
        None
    }

    /// Offer the extraction deadline to the driver. Returning `true` means
    /// `extract` enforces it itself and releases whatever it started (child
    /// processes, connections) before returning [`DriverFailure::TimedOut`];
    /// the instance then runs `extract` inline instead of on a worker thread
    /// that would be abandoned at the deadline.
    fn enforce_deadline(&mut self, _limit: Duration) -> bool {
        false
    }
}

type Factory = dyn Fn() -> Box<dyn Driver> + Send + Sync;
type Predicate = dyn Fn(&ArgumentSet) -> bool + Send + Sync;

/// Declared inability of a driver to handle some argument sets.
#[derive(Clone)]
pub struct Bailout {
    name: String,
    predicate: Arc<Predicate>,
}

impl Bailout {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn applies(&self, args: &ArgumentSet) -> bool {
        (self.predicate)(args)
    }
}

impl fmt::Debug for Bailout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bailout").field("name", &self.name).finish()
    }
}

/// A named, capability-bearing driver constructor.
#[derive(Clone)]
pub struct DriverType {
    name: Arc<str>,
    factory: Arc<Factory>,
    mandatory_args: Vec<String>,
    mandatory_settings: Vec<String>,
    bailouts: Vec<Bailout>,
    timeout: Option<Duration>,
}

impl DriverType {
    pub fn new<F, D>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> D + Send + Sync + 'static,
        D: Driver + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            factory: Arc::new(move || Box::new(factory()) as Box<dyn Driver>),
            mandatory_args: Vec::new(),
            mandatory_settings: Vec::new(),
            bailouts: Vec::new(),
            timeout: None,
        }
    }

    /// Arguments that must be bound before extraction.
    #[must_use]
    pub fn with_mandatory_args<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mandatory_args.extend(names.into_iter().map(Into::into));
        self
    }

    /// Settings that must be present before extraction.
    #[must_use]
    pub fn with_mandatory_settings<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mandatory_settings
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Skip argument sets for which `predicate` returns true.
    #[must_use]
    pub fn with_bailout<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&ArgumentSet) -> bool + Send + Sync + 'static,
    {
        self.bailouts.push(Bailout {
            name: name.into(),
            predicate: Arc::new(predicate),
        });
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn mandatory_args(&self) -> &[String] {
        &self.mandatory_args
    }

    #[must_use]
    pub fn mandatory_settings(&self) -> &[String] {
        &self.mandatory_settings
    }

    /// First bailout that applies to `args`, checked before anything is
    /// instantiated.
    #[must_use]
    pub fn check_values(&self, args: &ArgumentSet) -> Option<&Bailout> {
        self.bailouts.iter().find(|bailout| bailout.applies(args))
    }

    /// Create a fresh instance bound to `args`.
    #[must_use]
    pub fn instantiate(&self, args: ArgumentSet, settings: DriverSettings) -> DriverInstance {
        DriverInstance::new(self, (self.factory)(), args, settings)
    }
}

impl PartialEq for DriverType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for DriverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverType")
            .field("name", &self.name)
            .field("mandatory_args", &self.mandatory_args)
            .field("mandatory_settings", &self.mandatory_settings)
            .field("bailouts", &self.bailouts)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
