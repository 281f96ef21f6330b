//! Root configuration type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::schema::{default_servers, LogFormat};
use crate::{
    AuthSettings, CompressionSettings, ConfigError, LoggingSettings, MetricsSettings,
    RateLimitSettings, ServerSettings, TlsSettings,
};

/// Complete Pylon configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use pylon_config::PylonConfig;
///
/// let config = PylonConfig::default();
/// assert_eq!(config.servers["http-server"].bind_address, "0.0.0.0:8000");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PylonConfig {
    /// Named HTTP servers.
    #[serde(default = "default_servers")]
    pub servers: BTreeMap<String, ServerSettings>,

    /// Response compression.
    #[serde(default)]
    pub compression: CompressionSettings,

    /// Rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Bearer token authentication.
    #[serde(default)]
    pub auth: AuthSettings,

    /// TLS material for servers with the `tls` option.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSettings>,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Prometheus metrics.
    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl Default for PylonConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            compression: CompressionSettings::default(),
            rate_limit: RateLimitSettings::default(),
            auth: AuthSettings::default(),
            tls: None,
            logging: LoggingSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

impl PylonConfig {
    /// Development preset: pretty debug logging.
    ///
    /// ```
    /// use pylon_config::{LogFormat, PylonConfig};
    ///
    /// let config = PylonConfig::development();
    /// assert_eq!(config.logging.format, LogFormat::Pretty);
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config
    }

    /// Production preset: JSON logging at info level.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;
        config
    }

    /// Replaces the bind address of every configured server.
    pub fn override_bind_address(&mut self, addr: &str) {
        for server in self.servers.values_mut() {
            server.bind_address = addr.to_string();
        }
    }

    /// Validates the configuration.
    ///
    /// A server with an empty bind address is accepted here; the server
    /// factory reports it by name when the server is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::validation_error("no servers configured"));
        }

        for (name, server) in &self.servers {
            if name.trim().is_empty() {
                return Err(ConfigError::validation_error("server name must not be empty"));
            }
            if !server.bind_address.is_empty() && !has_port(&server.bind_address) {
                return Err(ConfigError::invalid_value(
                    format!("servers.{name}.bind_address"),
                    format!("expected host:port, got '{}'", server.bind_address),
                ));
            }
        }

        if self.compression.level > 9 {
            return Err(ConfigError::invalid_value(
                "compression.level",
                "must be between 0 and 9",
            ));
        }

        if self.rate_limit.limit == 0 {
            return Err(ConfigError::invalid_value(
                "rate_limit.limit",
                "must be greater than zero",
            ));
        }
        if self.rate_limit.interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "rate_limit.interval_ms",
                "must be greater than zero",
            ));
        }
        if self.rate_limit.header.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "rate_limit.header",
                "must not be empty",
            ));
        }

        if self.auth.tokens.iter().any(|t| t.contains(',')) {
            return Err(ConfigError::invalid_value(
                "auth.tokens",
                "token must not contain comma",
            ));
        }

        if pylon_telemetry::logging::create_env_filter(&self.logging.level).is_err() {
            return Err(ConfigError::invalid_value(
                "logging.level",
                format!("invalid filter '{}'", self.logging.level),
            ));
        }

        if self.metrics.enabled
            && self
                .metrics
                .addr
                .parse::<std::net::SocketAddr>()
                .is_err()
        {
            return Err(ConfigError::invalid_value(
                "metrics.addr",
                format!("invalid socket address: {}", self.metrics.addr),
            ));
        }

        Ok(())
    }
}

fn has_port(addr: &str) -> bool {
    addr.rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok())
}
