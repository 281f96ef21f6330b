//! Prometheus metrics for Pylon.
//!
//! Recording functions are always safe to call; without an installed
//! recorder the `metrics` macros are no-ops.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether the Prometheus exporter is installed.
    pub enabled: bool,

    /// Address the exporter listens on (e.g., "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Installs the Prometheus recorder and spawns its HTTP listener.
///
/// Must be called within a Tokio runtime.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparseable address and
/// `TelemetryError::MetricsInit` if the recorder cannot be installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .build()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "metrics exporter stopped");
        }
    });
    tracing::info!(%addr, "metrics exporter listening");

    register_metric_descriptions();

    Ok(())
}

fn register_metric_descriptions() {
    describe_counter!("pylon_requests_total", "Total number of HTTP requests served");
    describe_histogram!(
        "pylon_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "pylon_rate_limited_total",
        "Requests rejected by the rate limiter"
    );
    describe_counter!(
        "pylon_auth_rejected_total",
        "Requests rejected by the auth gate"
    );
    describe_counter!(
        "pylon_responses_compressed_total",
        "Responses sent with gzip encoding"
    );
}

/// Records a completed request.
pub fn record_request(server: &str, pattern: &str, status_code: u16, duration: Duration) {
    counter!(
        "pylon_requests_total",
        "server" => server.to_string(),
        "pattern" => pattern.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(
        "pylon_request_duration_seconds",
        "server" => server.to_string(),
        "pattern" => pattern.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records a request rejected with 429.
pub fn record_rate_limited() {
    counter!("pylon_rate_limited_total").increment(1);
}

/// Records a request rejected by the auth gate.
pub fn record_auth_rejected(reason: &'static str) {
    counter!("pylon_auth_rejected_total", "reason" => reason).increment(1);
}

/// Records a response that switched to gzip encoding.
pub fn record_compressed() {
    counter!("pylon_responses_compressed_total").increment(1);
}
