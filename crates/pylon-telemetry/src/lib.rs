//! Observability for Pylon.
//!
//! - **Logging**: structured JSON or pretty output through `tracing-subscriber`,
//!   written to stdout or to a [`RollingFile`]
//! - **Rotation**: [`RollingFile`] can be rotated on demand (SIGHUP) or when it
//!   grows past a size limit
//! - **Metrics**: Prometheus exposition via the `metrics` crate
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `pylon_requests_total` | Counter | `server`, `pattern`, `status` | Requests served |
//! | `pylon_request_duration_seconds` | Histogram | `server`, `pattern` | Request latency |
//! | `pylon_rate_limited_total` | Counter | - | Requests rejected with 429 |
//! | `pylon_auth_rejected_total` | Counter | `reason` | Requests rejected by the auth gate |
//! | `pylon_responses_compressed_total` | Counter | - | Responses sent gzip-encoded |

#![doc(html_root_url = "https://docs.rs/pylon-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;
pub mod metrics;
pub mod rolling;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LoggingHandle};
pub use metrics::{init_metrics, MetricsConfig};
pub use rolling::RollingFile;

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
