//! Prometheus metrics for Janus.
//!
//! Installs the process-wide `metrics` recorder backed by
//! `metrics-exporter-prometheus`. The exporter does not open its own
//! listener: the server's metrics listener serves [`render_metrics`] at
//! `/metrics`.
//!
//! # Gateway Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `grpc_server_started_total` | Counter | `grpc_type`, `grpc_service`, `grpc_method` |
//! | `grpc_server_handled_total` | Counter | ... + `grpc_code` |
//! | `grpc_server_msg_received_total` | Counter | `grpc_type`, `grpc_service`, `grpc_method` |
//! | `grpc_server_msg_sent_total` | Counter | `grpc_type`, `grpc_service`, `grpc_method` |
//! | `grpc_server_handling_seconds` | Histogram | ... + `grpc_code` |
//! | `grpc_req_panics_recovered_total` | Counter | - |
//! | `janus_in_flight_calls` | Gauge | - |

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;

use janus_middleware::stages::metrics::names;
use janus_middleware::stages::HANDLING_BUCKETS;
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// In-flight calls gauge.
pub const IN_FLIGHT: &str = "janus_in_flight_calls";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static IN_FLIGHT_CALLS: AtomicI64 = AtomicI64::new(0);

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Service name for log fields.
    pub service_name: String,

    /// Histogram buckets for `grpc_server_handling_seconds`.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "janus".to_string(),
            duration_buckets: HANDLING_BUCKETS.to_vec(),
        }
    }
}

/// Installs the global Prometheus recorder.
///
/// Idempotent: a second call keeps the first recorder.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if the buckets are invalid or
/// another recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled || METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::HANDLING_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    describe_metrics();
    tracing::debug!(service = %config.service_name, "metrics recorder installed");
    Ok(())
}

/// Returns the global metrics handle if initialized.
pub fn metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn describe_metrics() {
    describe_counter!(names::STARTED, "Total number of calls started on the server.");
    describe_counter!(
        names::HANDLED,
        "Total number of calls completed on the server, regardless of success or failure."
    );
    describe_counter!(names::MSG_RECEIVED, "Total number of messages received on the server.");
    describe_counter!(names::MSG_SENT, "Total number of messages sent by the server.");
    describe_histogram!(
        names::HANDLING_SECONDS,
        metrics::Unit::Seconds,
        "Histogram of response latency of calls handled by the server."
    );
    describe_counter!(names::PANICS_RECOVERED, "Total number of handler panics recovered.");
    describe_gauge!(IN_FLIGHT, "Number of calls currently being handled.");
}

/// Number of calls currently being handled.
pub fn in_flight() -> i64 {
    IN_FLIGHT_CALLS.load(Ordering::Relaxed)
}

/// Counts a call as in flight until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Increments the in-flight count.
    #[must_use]
    pub fn new() -> Self {
        let now = IN_FLIGHT_CALLS.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!(IN_FLIGHT).set(now as f64);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let now = IN_FLIGHT_CALLS.fetch_sub(1, Ordering::Relaxed) - 1;
        gauge!(IN_FLIGHT).set(now as f64);
    }
}
