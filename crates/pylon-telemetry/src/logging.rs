//! Structured logging for Pylon.
//!
//! Logs go through `tracing`; this module installs the global subscriber.
//! Output is JSON (production) or pretty (development) and is written either
//! to stdout or to a [`RollingFile`], which the orchestrator can rotate on
//! SIGHUP through the returned [`LoggingHandle`].
//!
//! File output goes through a `tracing_appender` worker thread, so request
//! tasks never block on disk writes or size-triggered rotation. Keep the
//! handle alive until shutdown; dropping it flushes buffered lines.
//!
//! # Example
//!
//! ```rust,ignore
//! use pylon_telemetry::logging::{LogConfig, init_logging};
//!
//! let handle = init_logging(&LogConfig::default())?;
//! tracing::info!(server = "http-server", "listening");
//! ```

use crate::error::TelemetryError;
use crate::rolling::RollingFile;
use crate::TelemetryResult;
use pylon_core::LogRotate;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Log level or filter directive (e.g., "info", "pylon_server=debug").
    pub level: String,

    /// Whether to output JSON format.
    pub json_format: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include target (module path).
    pub include_target: bool,

    /// Write to this file instead of stdout.
    pub file: Option<PathBuf>,

    /// Rotate the file once it reaches this many bytes.
    pub max_size_bytes: Option<u64>,

    /// Number of rotated files to keep.
    pub max_backups: Option<usize>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            file_line_info: false,
            include_target: true,
            file: None,
            max_size_bytes: None,
            max_backups: None,
        }
    }
}

impl LogConfig {
    /// Human-readable output at debug level.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            json_format: false,
            file_line_info: true,
            ..Self::default()
        }
    }

    /// JSON output at info level.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }
}

/// Handle to the installed logging outputs.
#[derive(Debug, Clone, Default)]
pub struct LoggingHandle {
    file: Option<RollingFile>,
    guard: Option<Arc<WorkerGuard>>,
}

impl LoggingHandle {
    /// The rolling log file, if logging goes to a file.
    pub fn file(&self) -> Option<&RollingFile> {
        self.file.as_ref()
    }

    /// Sinks that should be rotated on SIGHUP.
    pub fn rotators(&self) -> Vec<Arc<dyn LogRotate>> {
        self.file
            .iter()
            .map(|f| Arc::new(f.clone()) as Arc<dyn LogRotate>)
            .collect()
    }
}

/// Initializes the logging subsystem.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter is invalid or a global
/// subscriber is already installed, and `TelemetryError::Io` if the log file
/// cannot be opened.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<LoggingHandle> {
    if !config.enabled {
        return Ok(LoggingHandle::default());
    }

    let filter = create_env_filter(&config.level)?;
    let file = open_log_file(config)?;

    let (writer, guard) = match &file {
        Some(f) => {
            let (writer, guard) = file_writer(f);
            (BoxMakeWriter::new(writer), Some(Arc::new(guard)))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };
    let ansi = file.is_none();

    let fmt_layer = if config.json_format {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_writer(writer)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    Ok(LoggingHandle { file, guard })
}

/// Moves writes to `file` onto a background worker.
fn file_writer(file: &RollingFile) -> (NonBlocking, WorkerGuard) {
    tracing_appender::non_blocking(file.clone())
}

fn open_log_file(config: &LogConfig) -> TelemetryResult<Option<RollingFile>> {
    let Some(path) = &config.file else {
        return Ok(None);
    };

    let mut file = RollingFile::open(path)?;
    if let Some(bytes) = config.max_size_bytes {
        file = file.with_max_size(bytes);
    }
    if let Some(count) = config.max_backups {
        file = file.with_max_backups(count);
    }
    Ok(Some(file))
}

/// Creates an env filter from a string.
///
/// # Errors
///
/// Returns error if the filter string is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}
