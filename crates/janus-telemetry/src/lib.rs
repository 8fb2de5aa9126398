//! Logging and metrics setup for Janus services.
//!
//! - **Logging**: `tracing-subscriber` with JSON or human-readable output;
//!   call spans opened by the pipeline's logging stage flow into every record
//! - **Metrics**: the `metrics` facade backed by a Prometheus recorder whose
//!   exposition the server's metrics listener serves at `/metrics`
//!
//! # Example
//!
//! ```rust,ignore
//! use janus_telemetry::{TelemetryConfig, init_telemetry};
//!
//! let config = TelemetryConfig::builder()
//!     .service_name("echo")
//!     .log_level("info,janus_server=debug")
//!     .build();
//!
//! init_telemetry(&config)?;
//! ```
//!
//! # Metrics Endpoint
//!
//! ```text
//! # HELP grpc_server_handled_total Total number of calls completed on the server, regardless of success or failure.
//! # TYPE grpc_server_handled_total counter
//! grpc_server_handled_total{grpc_type="unary",grpc_service="echo.Echo",grpc_method="Say",grpc_code="ok"} 1234
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{fields, init_logging, LogConfig, LogFormat};
pub use metrics::{in_flight, init_metrics, render_metrics, InFlightGuard, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        "telemetry initialized"
    );
    Ok(())
}
