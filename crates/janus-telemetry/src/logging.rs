//! Structured logging for Janus.
//!
//! Installs a `tracing-subscriber` registry with one `fmt` layer. In JSON
//! mode each record carries the fields of the current call span (see
//! [`fields`]), so a handler's own log lines are tagged with the method,
//! protocol, peer and request id without doing anything.
//!
//! `RUST_LOG`, when set, overrides the configured level.
//!
//! # Example
//!
//! ```rust,ignore
//! use janus_telemetry::logging::{LogConfig, init_logging};
//!
//! init_logging(&LogConfig::production())?;
//! tracing::info!(user_id = "u1", "looking up invoices");
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line, human readable.
    Pretty,
    /// Single-line, human readable.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive (e.g., "info", "janus_server=debug,hyper=warn").
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Whether to include span open/close events.
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include thread IDs.
    pub thread_ids: bool,

    /// Whether to include target (module path).
    pub include_target: bool,

    /// Service name for log fields.
    pub service_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            span_events: false,
            file_line_info: false,
            thread_ids: false,
            include_target: true,
            service_name: "janus".to_string(),
        }
    }
}

impl LogConfig {
    /// Human-readable output at debug level.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            span_events: true,
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

fn env_filter(level: &str) -> TelemetryResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => create_env_filter(level),
    }
}

/// Initializes the logging subsystem.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the level is invalid or a
/// global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = env_filter(&config.level)?;
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = tracing_subscriber::fmt::layer()
        .with_span_events(span_events)
        .with_file(config.file_line_info)
        .with_line_number(config.file_line_info)
        .with_thread_ids(config.thread_ids)
        .with_target(config.include_target);

    let layer = match config.format {
        LogFormat::Json => base
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => base.pretty().with_filter(filter).boxed(),
        LogFormat::Compact => base.compact().with_filter(filter).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    tracing::debug!(service = %config.service_name, format = ?config.format, "logging initialized");
    Ok(())
}

/// Creates an env filter from a string.
///
/// # Errors
///
/// Returns error if the filter string is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter).map_err(|e| TelemetryError::LoggingInit(format!("invalid log level: {e}")))
}

/// Field names used by gateway log records.
pub mod fields {
    /// Full method path, `/pkg.Service/Method`.
    pub const ACTION: &str = "action";

    /// `grpc/server/unary`, `http/server/server_stream`, ...
    pub const PROTOCOL: &str = "protocol";

    /// Remote address.
    pub const PEER: &str = "peer";

    /// Absolute call deadline.
    pub const DEADLINE: &str = "deadline";

    /// Request ID.
    pub const REQUEST_ID: &str = "request_id";

    /// OAuth client.
    pub const CLIENT_ID: &str = "client_id";

    /// End user.
    pub const USER_ID: &str = "user_id";

    /// Device.
    pub const DEVICE_ID: &str = "device_id";

    /// Call duration in milliseconds.
    pub const DURATION: &str = "duration";

    /// Status code name.
    pub const CODE: &str = "code";

    /// Error message.
    pub const ERROR: &str = "error";

    /// Panic location fragment.
    pub const STACK: &str = "stack";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "info");

        let dev = LogConfig::development();
        assert_eq!(dev.format, LogFormat::Pretty);
        assert!(dev.span_events);
        assert_eq!(dev.level, "debug");

        assert_eq!(LogConfig::production().format, LogFormat::Json);
    }

    #[test]
    fn test_format_names() {
        let format: LogFormat = serde_json::from_str("\"compact\"").unwrap();
        assert_eq!(format, LogFormat::Compact);
    }

    #[test]
    fn test_create_env_filter() {
        assert!(create_env_filter("info,janus_server=debug").is_ok());
        assert!(create_env_filter("janus=loudest").is_err());
    }

    #[test]
    fn test_disabled_logging() {
        let config = LogConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_logging(&config).is_ok());
    }
}
