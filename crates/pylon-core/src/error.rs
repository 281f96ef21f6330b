//! Error types for core runtime construction.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while establishing the process runtime.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The home directory could not be resolved to an absolute path.
    #[error("failed to resolve home directory {path}: {source}")]
    HomeDir {
        /// Path as given.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The running executable could not be determined.
    #[error("failed to determine executable path: {0}")]
    Executable(String),
}

impl CoreError {
    /// Creates a home directory error.
    pub fn home_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::HomeDir {
            path: path.into(),
            source,
        }
    }
}
