//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Name of the server present when no `[servers]` table is configured.
pub const DEFAULT_SERVER_NAME: &str = "http-server";

/// Settings for one named HTTP server.
///
/// `options` is a `;`-separated set of flags: `handlers` registers the
/// application routes, `tls` serves over TLS using the `[tls]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// Bind address (e.g., "0.0.0.0:8000"). Empty means not configured.
    #[serde(default, alias = "bind-address")]
    pub bind_address: String,

    /// Server option flags.
    #[serde(default = "default_options")]
    pub options: String,

    /// Time allowed to read request headers.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Time allowed to produce a response.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Keep-alive idle time; 0 disables keep-alive.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,

    /// Time allowed for in-flight connections to finish on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

impl ServerSettings {
    /// Settings with the given bind address and default timeouts.
    pub fn with_bind_address(addr: impl Into<String>) -> Self {
        Self {
            bind_address: addr.into(),
            ..Self::default()
        }
    }

    /// Header read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Response deadline.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Keep-alive idle timeout.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Connection drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: String::new(),
            options: default_options(),
            read_timeout_ms: default_read_timeout(),
            write_timeout_ms: default_write_timeout(),
            idle_timeout_ms: default_idle_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

pub(crate) fn default_servers() -> BTreeMap<String, ServerSettings> {
    let mut servers = BTreeMap::new();
    servers.insert(
        DEFAULT_SERVER_NAME.to_string(),
        ServerSettings::with_bind_address("0.0.0.0:8000"),
    );
    servers
}

fn default_options() -> String {
    "handlers".to_string()
}

fn default_read_timeout() -> u64 {
    30_000
}

fn default_write_timeout() -> u64 {
    30_000
}

fn default_idle_timeout() -> u64 {
    60_000
}

fn default_shutdown_timeout() -> u64 {
    5_000
}

/// Response compression settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CompressionSettings {
    /// Install the compression middleware.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Position in the middleware chain (lower runs first).
    #[serde(default = "default_compression_order")]
    pub order: i32,

    /// Gzip level, 0-9.
    #[serde(default = "default_compression_level")]
    pub level: u32,

    /// Responses shorter than this are sent uncompressed.
    #[serde(default = "default_compression_threshold")]
    pub threshold: usize,

    /// Route patterns starting with one of these are never compressed.
    #[serde(default = "default_compression_skip")]
    pub skip: Vec<String>,

    /// Gzip request bodies inflating past this many bytes are rejected.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            order: default_compression_order(),
            level: default_compression_level(),
            threshold: default_compression_threshold(),
            skip: default_compression_skip(),
            max_request_bytes: default_max_request_bytes(),
        }
    }
}

fn default_compression_order() -> i32 {
    10
}

fn default_compression_level() -> u32 {
    1
}

fn default_compression_threshold() -> usize {
    1024
}

fn default_max_request_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_compression_skip() -> Vec<String> {
    vec!["/images".to_string(), "/videos".to_string(), "/ws".to_string()]
}

/// Fixed-window rate limiting settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    /// Install the rate limiter.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Position in the middleware chain.
    #[serde(default = "default_rate_limit_order")]
    pub order: i32,

    /// Route patterns starting with one of these are limited.
    #[serde(default = "default_api_prefixes")]
    pub prefixes: Vec<String>,

    /// Requests allowed per client per window.
    #[serde(default = "default_rate_limit")]
    pub limit: u32,

    /// Window length in milliseconds.
    #[serde(default = "default_rate_interval")]
    pub interval_ms: u64,

    /// Header carrying the client identity.
    #[serde(default = "default_rate_header")]
    pub header: String,
}

impl RateLimitSettings {
    /// Window length.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            order: default_rate_limit_order(),
            prefixes: default_api_prefixes(),
            limit: default_rate_limit(),
            interval_ms: default_rate_interval(),
            header: default_rate_header(),
        }
    }
}

fn default_rate_limit_order() -> i32 {
    20
}

fn default_api_prefixes() -> Vec<String> {
    vec!["/api".to_string()]
}

fn default_rate_limit() -> u32 {
    10
}

fn default_rate_interval() -> u64 {
    1_000
}

fn default_rate_header() -> String {
    "X-Forwarded-For".to_string()
}

/// Bearer token authentication settings.
///
/// The gate is only installed when `enabled` and at least one token is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthSettings {
    /// Install the auth gate.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Position in the middleware chain.
    #[serde(default = "default_auth_order")]
    pub order: i32,

    /// Route patterns starting with one of these require a token.
    #[serde(default = "default_api_prefixes")]
    pub prefixes: Vec<String>,

    /// Accepted bearer tokens.
    #[serde(default)]
    pub tokens: Vec<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            order: default_auth_order(),
            prefixes: default_api_prefixes(),
            tokens: Vec::new(),
        }
    }
}

fn default_auth_order() -> i32 {
    30
}

/// Certificate and key used by servers with the `tls` option.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TlsSettings {
    /// PEM certificate chain. Relative paths resolve against the home directory.
    pub cert_path: PathBuf,

    /// PEM private key.
    pub key_path: PathBuf,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON lines.
    #[default]
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Level or filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Log file; stdout when unset. Relative paths resolve against the home directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Rotate the log file once it reaches this size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_mb: Option<u64>,

    /// Rotated files to keep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backups: Option<usize>,
}

impl LoggingSettings {
    /// Converts to the telemetry logging configuration.
    pub fn to_log_config(&self) -> pylon_telemetry::LogConfig {
        pylon_telemetry::LogConfig {
            enabled: self.enabled,
            level: self.level.clone(),
            json_format: self.format == LogFormat::Json,
            file_line_info: self.format == LogFormat::Pretty,
            include_target: true,
            file: self.file.clone(),
            max_size_bytes: self.max_size_mb.map(|mb| mb * 1024 * 1024),
            max_backups: self.max_backups,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::Json,
            file: None,
            max_size_mb: None,
            max_backups: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsSettings {
    /// Install the exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter listen address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl MetricsSettings {
    /// Converts to the telemetry metrics configuration.
    pub fn to_metrics_config(&self) -> pylon_telemetry::MetricsConfig {
        pylon_telemetry::MetricsConfig {
            enabled: self.enabled,
            addr: self.addr.clone(),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_true() -> bool {
    true
}
