//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Why a configuration could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("config file '{}' does not exist", .0.display())]
    NotFound(PathBuf),

    /// A config file exists but could not be read.
    #[error("can not read config file '{}': {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or shape error.
    #[error("malformed TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON syntax error.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A setting holds a value outside its allowed range.
    #[error("property '{key}' {reason}")]
    Invalid {
        /// Dotted property path, e.g. `rate_limit.limit`.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A `PYLON__*` variable could not be applied.
    #[error("environment variable {var}: {reason}")]
    Env {
        /// Variable name.
        var: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The assembled configuration is inconsistent.
    #[error("{0}")]
    Validation(String),
}

impl ConfigError {
    pub(crate) fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }

    pub(crate) fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_value(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn validation_error(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
