//! Per-server configuration.
//!
//! # Example
//!
//! ```rust
//! use pylon_server::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder("http-server")
//!     .bind_address("127.0.0.1:8000")
//!     .idle_timeout(Duration::ZERO)
//!     .build();
//!
//! assert_eq!(config.bind_address(), "127.0.0.1:8000");
//! assert!(!config.keep_alive());
//! ```

use std::time::Duration;

/// Default read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Default write timeout.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time allowed for open connections to drain on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration of one HTTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    name: String,
    bind_address: String,
    read_timeout: Duration,
    write_timeout: Duration,
    idle_timeout: Duration,
    shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Creates a builder for the server called `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ServerConfigBuilder {
        ServerConfigBuilder::new(name)
    }

    /// Server name, used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address to listen on, `host:port`. Empty when not configured.
    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    /// Time allowed to read request headers.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Deadline for the middleware chain and handler; zero disables it.
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Idle keep-alive timeout; zero disables keep-alive.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Whether connections are kept alive between requests.
    pub fn keep_alive(&self) -> bool {
        !self.idle_timeout.is_zero()
    }

    /// Time allowed for open connections to finish on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Creates a builder with default timeouts and no bind address.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: ServerConfig {
                name: name.into(),
                bind_address: String::new(),
                read_timeout: DEFAULT_READ_TIMEOUT,
                write_timeout: DEFAULT_WRITE_TIMEOUT,
                idle_timeout: DEFAULT_IDLE_TIMEOUT,
                shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            },
        }
    }

    /// Sets the bind address.
    #[must_use]
    pub fn bind_address(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_address = addr.into();
        self
    }

    /// Sets the read timeout.
    ///
    /// Default: 30 seconds
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Sets the write timeout.
    ///
    /// Default: 30 seconds
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Sets the idle timeout.
    ///
    /// Default: 60 seconds
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Sets the shutdown drain timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        self.config
    }
}
