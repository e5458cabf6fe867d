//! In-process driver backed by a closure.

use std::sync::Arc;

use crate::driver::{Driver, DriverData, DriverFailure, DriverSettings, DriverType};
use crate::params::ArgumentSet;

type ExtractFn = dyn Fn(&ArgumentSet, &DriverSettings) -> Result<DriverData, String> + Send + Sync;

/// Driver calling a library function in-process.
#[derive(Clone)]
pub struct FnDriver {
    extract: Arc<ExtractFn>,
}

impl FnDriver {
    pub fn new<F>(extract: F) -> Self
    where
        F: Fn(&ArgumentSet, &DriverSettings) -> Result<DriverData, String> + Send + Sync + 'static,
    {
        Self {
            extract: Arc::new(extract),
        }
    }

    /// Driver type creating an `FnDriver` per argument set.
    pub fn driver_type<F>(name: impl Into<String>, extract: F) -> DriverType
    where
        F: Fn(&ArgumentSet, &DriverSettings) -> Result<DriverData, String> + Send + Sync + 'static,
    {
        let driver = Self::new(extract);
        DriverType::new(name, move || driver.clone())
    }
}

impl Driver for FnDriver {
    fn extract(
        &mut self,
        args: &ArgumentSet,
        settings: &DriverSettings,
    ) -> Result<DriverData, DriverFailure> {
        (self.extract)(args, settings).map_err(DriverFailure::extraction)
    }
}
