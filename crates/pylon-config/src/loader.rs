//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! defaults, files and environment variables.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, LogFormat, PylonConfig, ServerSettings};

/// Environment variable prefix used by the `pylon` binary.
pub const ENV_PREFIX: &str = "PYLON";

/// Configuration loader with layered approach.
///
/// The loader starts from a preset (defaults, development or production)
/// and merges every loaded file on top of it, table by table. Environment
/// overrides are applied last, when [`ConfigLoader::load`] is called.
///
/// Naming `[servers]` in any file replaces the preset's default server
/// instead of adding to it.
///
/// # Example
///
/// ```no_run
/// use pylon_config::ConfigLoader;
///
/// # fn main() -> Result<(), pylon_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_optional_file("pylon.toml")?
///     .with_optional_file("pylon.prod.toml")?
///     .with_env_prefix("PYLON")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    base: PylonConfig,
    layers: toml::Table,
    env_prefix: Option<String>,
    files_loaded: usize,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: PylonConfig::default(),
            layers: toml::Table::new(),
            env_prefix: None,
            files_loaded: 0,
        }
    }

    /// Start with default configuration values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.base = PylonConfig::default();
        self
    }

    /// Start with the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.base = PylonConfig::development();
        self
    }

    /// Start with the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.base = PylonConfig::production();
        self
    }

    /// Start with the preset matching a profile name.
    ///
    /// `prod`/`production` select the production preset, everything else
    /// the development preset.
    #[must_use]
    pub fn with_profile_preset(self, profile: &str) -> Self {
        match profile.to_lowercase().as_str() {
            "prod" | "production" => self.with_production(),
            _ => self.with_development(),
        }
    }

    /// Load configuration from a file.
    ///
    /// Supports TOML (.toml) and JSON (.json) formats, chosen by extension.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        let table = Self::parse_file(&content, path)?;
        merge_tables(&mut self.layers, table);
        self.files_loaded += 1;

        Ok(self)
    }

    /// Load configuration from a file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in the given format ("toml" or "json").
    ///
    /// ```
    /// use pylon_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [servers.api]
    ///     bind_address = "127.0.0.1:3000"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.servers["api"].bind_address, "127.0.0.1:3000");
    /// assert!(!config.servers.contains_key("http-server"));
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let table = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => json_to_table(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };

        merge_tables(&mut self.layers, table);
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Environment variables use the format `PREFIX__SECTION__KEY`; servers
    /// are addressed as `PREFIX__SERVERS__<NAME>__KEY` where `<NAME>` is the
    /// server name upper-cased with `-` written as `_`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a specific `.env` file, if present.
    pub fn with_dotenv_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            dotenvy::from_path(path.as_ref()).map_err(|e| {
                ConfigError::validation_error(format!(
                    "failed to load {}: {e}",
                    path.as_ref().display()
                ))
            })?;
        }
        Ok(self)
    }

    /// Number of configuration files merged so far.
    pub fn files_loaded(&self) -> usize {
        self.files_loaded
    }

    /// Finalize: merge layers, apply environment overrides and validate.
    pub fn load(self) -> Result<PylonConfig, ConfigError> {
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Finalize without validation.
    pub fn load_unvalidated(mut self) -> Result<PylonConfig, ConfigError> {
        let mut config = self.merged()?;

        if let Some(prefix) = self.env_prefix.take() {
            let vars: HashMap<String, String> = env::vars()
                .filter(|(k, _)| k.starts_with(&prefix))
                .collect();
            for (key, value) in vars {
                apply_env_var(&mut config, &key, &value, &prefix)?;
            }
        }

        Ok(config)
    }

    fn merged(&self) -> Result<PylonConfig, ConfigError> {
        if self.layers.is_empty() {
            return Ok(self.base.clone());
        }

        let mut table = match toml::Value::try_from(&self.base) {
            Ok(toml::Value::Table(table)) => table,
            Ok(_) => toml::Table::new(),
            Err(e) => {
                return Err(ConfigError::validation_error(format!(
                    "failed to encode base configuration: {e}"
                )))
            }
        };
        if self.layers.contains_key("servers") {
            table.remove("servers");
        }
        merge_tables(&mut table, self.layers.clone());

        Ok(toml::Value::Table(table).try_into()?)
    }

    fn parse_file(content: &str, path: &Path) -> Result<toml::Table, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => json_to_table(content),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }
}

fn json_to_table(content: &str) -> Result<toml::Table, ConfigError> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    match toml::Value::try_from(value) {
        Ok(toml::Value::Table(table)) => Ok(table),
        Ok(_) => Err(ConfigError::validation_error(
            "JSON configuration must be an object",
        )),
        Err(e) => Err(ConfigError::validation_error(format!(
            "unsupported JSON value: {e}"
        ))),
    }
}

/// Recursively merges `overlay` into `base`; non-table values replace.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn apply_env_var(
    config: &mut PylonConfig,
    key: &str,
    value: &str,
    prefix: &str,
) -> Result<(), ConfigError> {
    let key_without_prefix = key
        .strip_prefix(prefix)
        .and_then(|k| k.strip_prefix("__"))
        .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;

    let parts: Vec<&str> = key_without_prefix.split("__").collect();

    match parts.as_slice() {
        ["SERVERS", name, field] => {
            let server = server_entry(config, name);
            match *field {
                "BIND_ADDRESS" => server.bind_address = value.to_string(),
                "OPTIONS" => server.options = value.to_string(),
                "READ_TIMEOUT_MS" => server.read_timeout_ms = parse_u64(key, value)?,
                "WRITE_TIMEOUT_MS" => server.write_timeout_ms = parse_u64(key, value)?,
                "IDLE_TIMEOUT_MS" => server.idle_timeout_ms = parse_u64(key, value)?,
                "SHUTDOWN_TIMEOUT_MS" => server.shutdown_timeout_ms = parse_u64(key, value)?,
                _ => {}
            }
        }

        ["COMPRESSION", "ENABLED"] => config.compression.enabled = parse_bool_var(key, value)?,
        ["COMPRESSION", "LEVEL"] => {
            config.compression.level = value
                .parse()
                .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
        }
        ["COMPRESSION", "THRESHOLD"] => {
            config.compression.threshold = value
                .parse()
                .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
        }
        ["COMPRESSION", "MAX_REQUEST_BYTES"] => {
            config.compression.max_request_bytes = value
                .parse()
                .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
        }

        ["RATE_LIMIT", "ENABLED"] => config.rate_limit.enabled = parse_bool_var(key, value)?,
        ["RATE_LIMIT", "LIMIT"] => {
            config.rate_limit.limit = value
                .parse()
                .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
        }
        ["RATE_LIMIT", "INTERVAL_MS"] => config.rate_limit.interval_ms = parse_u64(key, value)?,
        ["RATE_LIMIT", "HEADER"] => config.rate_limit.header = value.to_string(),
        ["RATE_LIMIT", "PREFIXES"] => config.rate_limit.prefixes = split_list(value),

        ["AUTH", "ENABLED"] => config.auth.enabled = parse_bool_var(key, value)?,
        ["AUTH", "PREFIXES"] => config.auth.prefixes = split_list(value),
        ["AUTH", "TOKENS"] => config.auth.tokens = split_list(value),

        ["TLS", "CERT_PATH"] => {
            let key_path = config.tls.as_ref().map(|t| t.key_path.clone()).unwrap_or_default();
            config.tls = Some(crate::TlsSettings {
                cert_path: value.into(),
                key_path,
            });
        }
        ["TLS", "KEY_PATH"] => {
            let cert_path = config.tls.as_ref().map(|t| t.cert_path.clone()).unwrap_or_default();
            config.tls = Some(crate::TlsSettings {
                cert_path,
                key_path: value.into(),
            });
        }

        ["LOGGING", "ENABLED"] => config.logging.enabled = parse_bool_var(key, value)?,
        ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
        ["LOGGING", "FORMAT"] => {
            config.logging.format = match value.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => {
                    return Err(ConfigError::env_parse_error(
                        key,
                        "expected 'json' or 'pretty'",
                    ))
                }
            };
        }
        ["LOGGING", "FILE"] => {
            config.logging.file = if value.is_empty() {
                None
            } else {
                Some(value.into())
            };
        }

        ["METRICS", "ENABLED"] => config.metrics.enabled = parse_bool_var(key, value)?,
        ["METRICS", "ADDR"] => config.metrics.addr = value.to_string(),

        // Unknown key - ignore
        _ => {}
    }

    Ok(())
}

/// Finds the server an environment segment refers to, creating it if absent.
fn server_entry<'a>(config: &'a mut PylonConfig, segment: &str) -> &'a mut ServerSettings {
    let existing = config
        .servers
        .keys()
        .find(|name| env_segment(name) == segment)
        .cloned();
    let name = existing.unwrap_or_else(|| segment.to_lowercase().replace('_', "-"));
    config.servers.entry(name).or_default()
}

fn env_segment(name: &str) -> String {
    name.to_uppercase().replace('-', "_")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn parse_bool_var(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
