//! Configuration system: TOML file + env var overrides + defaults.
//!
//! ```toml
//! [run]
//! catch_panics = true
//! default_timeout_ms = 5000
//!
//! [report]
//! max_argsets_shown = 20
//!
//! [log]
//! jsonl_path = "target/dfh/run.jsonl"
//!
//! [drivers.CliCalc]
//! timeout_ms = 2000
//! settings = { cmd = "/usr/local/bin/calc" }
//!
//! [[rules.apply_hacks]]
//! drivers = [{ rname = "CliCalc" }]
//! actions = [{ remove = ["/result/build"] }]
//! ```

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::{HarnessError, Result};
use crate::hacks::Rule;

/// Full harness configuration model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    pub run: RunConfig,
    pub report: ReportConfig,
    pub log: LogConfig,
    /// Per-driver tables keyed by driver type name.
    pub drivers: BTreeMap<String, DriverConfig>,
    pub rules: RulesConfig,
}

/// Run loop knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Turn driver and comparator panics into recorded errors.
    pub catch_panics: bool,
    /// Deadline for drivers without their own timeout.
    pub default_timeout_ms: Option<u64>,
    /// Enables the throttle when set.
    pub throttle_max_load: Option<u32>,
    pub throttle_frame_ms: u64,
}

/// Report rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportConfig {
    pub max_argsets_shown: usize,
    pub slowest_n: usize,
    pub include_stats: bool,
}

/// Run event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// JSONL destination; no log is written when unset.
    pub jsonl_path: Option<PathBuf>,
    pub fallback_path: Option<PathBuf>,
    pub max_size_bytes: u64,
}

/// One `[drivers.<Name>]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    pub timeout_ms: Option<u64>,
    pub settings: BTreeMap<String, Value>,
}

/// Case rewriting rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RulesConfig {
    /// Applied to every case before comparison.
    pub apply_hacks: Vec<Rule>,
    /// Applied to mismatching cases before the diff is built (non-strict
    /// comparators only).
    pub cleanup: Vec<Rule>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            catch_panics: true,
            default_timeout_ms: None,
            throttle_max_load: None,
            throttle_frame_ms: 60_000,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_argsets_shown: 20,
            slowest_n: 3,
            include_stats: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            jsonl_path: None,
            fallback_path: None,
            max_size_bytes: 64 * 1024 * 1024,
        }
    }
}

impl HarnessConfig {
    /// Load config from an explicit path, or defaults when `None`; then apply
    /// `DFH_*` env overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) if path.exists() => {
                let raw = fs::read_to_string(path).map_err(|source| HarnessError::io(path, source))?;
                toml::from_str(&raw)?
            }
            Some(path) => {
                return Err(HarnessError::MissingConfig {
                    path: path.to_path_buf(),
                });
            }
            None => Self::default(),
        };
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate TOML text without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for run logs.
    ///
    /// FNV-1a over canonical JSON; stable across processes and releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Driver settings as one flat `"Driver.setting"` map.
    #[must_use]
    pub fn flat_driver_settings(&self) -> BTreeMap<String, Value> {
        self.drivers
            .iter()
            .flat_map(|(driver, cfg)| {
                cfg.settings
                    .iter()
                    .map(move |(key, value)| (format!("{driver}.{key}"), value.clone()))
            })
            .collect()
    }

    /// Per-driver timeouts from the `[drivers]` tables.
    #[must_use]
    pub fn driver_timeouts(&self) -> BTreeMap<String, Duration> {
        self.drivers
            .iter()
            .filter_map(|(name, cfg)| cfg.timeout_ms.map(|ms| (name.clone(), Duration::from_millis(ms))))
            .collect()
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("DFH_CATCH_PANICS") {
            self.run.catch_panics = parse_env("DFH_CATCH_PANICS", &raw)?;
        }
        if let Some(raw) = lookup("DFH_DEFAULT_TIMEOUT_MS") {
            self.run.default_timeout_ms = Some(parse_env("DFH_DEFAULT_TIMEOUT_MS", &raw)?);
        }
        if let Some(raw) = lookup("DFH_THROTTLE_MAX_LOAD") {
            self.run.throttle_max_load = Some(parse_env("DFH_THROTTLE_MAX_LOAD", &raw)?);
        }
        if let Some(raw) = lookup("DFH_THROTTLE_FRAME_MS") {
            self.run.throttle_frame_ms = parse_env("DFH_THROTTLE_FRAME_MS", &raw)?;
        }

        if let Some(raw) = lookup("DFH_REPORT_MAX_ARGSETS_SHOWN") {
            self.report.max_argsets_shown = parse_env("DFH_REPORT_MAX_ARGSETS_SHOWN", &raw)?;
        }
        if let Some(raw) = lookup("DFH_REPORT_SLOWEST_N") {
            self.report.slowest_n = parse_env("DFH_REPORT_SLOWEST_N", &raw)?;
        }
        if let Some(raw) = lookup("DFH_REPORT_INCLUDE_STATS") {
            self.report.include_stats = parse_env("DFH_REPORT_INCLUDE_STATS", &raw)?;
        }

        if let Some(raw) = lookup("DFH_LOG_JSONL_PATH") {
            self.log.jsonl_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("DFH_LOG_FALLBACK_PATH") {
            self.log.fallback_path = Some(PathBuf::from(raw));
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.run.default_timeout_ms == Some(0) {
            return Err(HarnessError::InvalidConfig {
                details: "run.default_timeout_ms must be > 0".to_string(),
            });
        }
        if self.run.throttle_max_load == Some(0) {
            return Err(HarnessError::InvalidConfig {
                details: "run.throttle_max_load must be >= 1".to_string(),
            });
        }
        if self.run.throttle_frame_ms == 0 {
            return Err(HarnessError::InvalidConfig {
                details: "run.throttle_frame_ms must be > 0".to_string(),
            });
        }
        if self.log.max_size_bytes < 1024 {
            return Err(HarnessError::InvalidConfig {
                details: format!(
                    "log.max_size_bytes must be >= 1024, got {}",
                    self.log.max_size_bytes
                ),
            });
        }

        for (name, driver) in &self.drivers {
            if name.is_empty() || name.contains('.') {
                return Err(HarnessError::InvalidConfig {
                    details: format!("driver table name {name:?} must be non-empty without '.'"),
                });
            }
            if driver.timeout_ms == Some(0) {
                return Err(HarnessError::InvalidConfig {
                    details: format!("drivers.{name}.timeout_ms must be > 0"),
                });
            }
        }

        for rule in self.rules.apply_hacks.iter().chain(&self.rules.cleanup) {
            rule.validate()?;
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| HarnessError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
