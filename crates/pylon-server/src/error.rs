//! Server error types.

use crate::lifecycle::LifecycleError;
use thiserror::Error;

/// Errors raised while binding, serving or orchestrating servers.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The listener could not be opened.
    #[error("can not bind to port '{addr}', {source}")]
    Bind {
        /// Configured bind address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `bind` was called on a server that already holds a listener.
    #[error("server '{0}' is already bound")]
    AlreadyBound(String),

    /// `serve` was called before a successful `bind`.
    #[error("server '{0}' is not bound")]
    NotBound(String),

    /// The listener failed while serving.
    #[error("server '{name}' failed: {source}")]
    Io {
        /// Server name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid server configuration.
    #[error("{0}")]
    Config(String),

    /// No servers were registered.
    #[error("no servers found in server context")]
    NoServers,

    /// Every server failed to bind.
    #[error("no server could be bound")]
    NothingBound,

    /// A panic inside the bind or serve path.
    #[error("recovered on panic: {0}")]
    Panic(String),

    /// OS signal handlers could not be installed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    /// TLS material could not be loaded.
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// A startup hook failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ServerError {
    /// Creates a bind error.
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    /// Creates a serve I/O error.
    pub fn io(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            name: name.into(),
            source,
        }
    }

    /// Builds a [`ServerError::Panic`] from a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::Panic(message)
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
