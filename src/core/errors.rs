//! DFH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Top-level error type for the harness.
///
/// Only configuration, spec and enumeration problems surface as this type.
/// Driver and comparator failures are recorded as outcomes instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("[DFH-1001] invalid parameter spec: {details}")]
    InvalidSpec { details: String },

    #[error("[DFH-1002] value source `{parameter}` failed: {details}")]
    ValueSource { parameter: String, details: String },

    #[error("[DFH-1101] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DFH-1102] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DFH-1103] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DFH-2001] path not found: {path}")]
    PathNotFound { path: String },

    #[error("[DFH-2002] invalid rule: {details}")]
    InvalidRule { details: String },

    #[error("[DFH-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DFH-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidSpec { .. } => "DFH-1001",
            Self::ValueSource { .. } => "DFH-1002",
            Self::InvalidConfig { .. } => "DFH-1101",
            Self::MissingConfig { .. } => "DFH-1102",
            Self::ConfigParse { .. } => "DFH-1103",
            Self::PathNotFound { .. } => "DFH-2001",
            Self::InvalidRule { .. } => "DFH-2002",
            Self::Serialization { .. } => "DFH-2101",
            Self::Io { .. } => "DFH-3002",
        }
    }

    /// Whether the error came from enumerating the parameter space.
    #[must_use]
    pub const fn is_generator_error(&self) -> bool {
        matches!(self, Self::InvalidSpec { .. } | Self::ValueSource { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for spec validation failures.
    #[must_use]
    pub fn invalid_spec(details: impl Into<String>) -> Self {
        Self::InvalidSpec {
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for HarnessError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
