//! # Core Error Types
//!
//! Centralized error definitions for the loadtest-core crate.
//! All errors implement `std::error::Error` and `std::fmt::Display`.

use thiserror::Error;

/// Unified error type for loadtest-core operations.
///
/// Wraps the specific error families and adds [`CoreError::Cancelled`], the
/// error every blocking primitive (rate limiter, gas vault, runner) returns
/// once the shared cancellation token fires.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Config(ConfigError),

    #[error(transparent)]
    Gas(GasError),

    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }
}

impl From<ConfigError> for CoreError {
    fn from(e: ConfigError) -> Self {
        CoreError::Config(e)
    }
}

impl From<GasError> for CoreError {
    fn from(e: GasError) -> Self {
        CoreError::Gas(e)
    }
}

/// Configuration-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid RPC URL format: '{url}'")]
    InvalidRpcUrl { url: String },

    #[error("Missing required configuration field: '{field}'")]
    MissingField { field: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Incompatible options: {reason}")]
    Conflict { reason: String },

    #[error("unrecognized load test mode: {name}")]
    UnknownMode { name: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("I/O error reading {path}: {msg}")]
    IoError { path: String, msg: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn conflict(reason: impl Into<String>) -> Self {
        ConfigError::Conflict {
            reason: reason.into(),
        }
    }
}

/// Gas manager construction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GasError {
    #[error("dynamic gas price strategy requires at least one price")]
    EmptyPriceList,

    #[error("wave period must be at least 1, got {period}")]
    InvalidPeriod { period: u64 },

    #[error("unknown oscillation wave: '{name}'")]
    UnknownWave { name: String },

    #[error("unknown gas price strategy: '{name}'")]
    UnknownStrategy { name: String },
}
