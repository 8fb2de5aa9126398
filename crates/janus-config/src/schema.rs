//! Configuration schema types.
//!
//! This module defines the structure of every configuration section except
//! `limits`, which is the rate limiter's own rule set
//! ([`RouterLimit`](janus_middleware::RouterLimit)).

use std::time::Duration;

use janus_core::duration::serde_str;
use janus_middleware::stages::LoggingOptions;
use janus_telemetry::{LogConfig, LogFormat, MetricsConfig, TelemetryConfig};
use serde::{Deserialize, Serialize};

/// Server configuration section.
///
/// Listener addresses, drain timing and the feature flags that shape both
/// protocol surfaces.
///
/// # Example
///
/// ```
/// use janus_config::ServerSection;
///
/// let config = ServerSection {
///     http_addr: "127.0.0.1:3000".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.grpc_addr, "0.0.0.0:8081");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// JSON/HTTP listener address.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// gRPC listener address.
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: String,

    /// Prometheus listener address.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    /// Deadline for draining each listener.
    #[serde(default = "default_shutdown_timeout", with = "serde_str")]
    pub shutdown_timeout: Duration,

    /// Maximum age of a gRPC connection when keep-alive is on.
    #[serde(default = "default_max_connection_age", with = "serde_str")]
    pub max_connection_age: Duration,

    /// HTTP keep-alive and gRPC connection recycling.
    #[serde(default = "default_true")]
    pub keep_alive: bool,

    /// CORS headers for requests carrying `Origin`.
    #[serde(default = "default_true")]
    pub cors: bool,

    /// Expose every registered method as `POST /<service>/<method>`.
    #[serde(default = "default_true")]
    pub auto_http: bool,

    /// camelCase JSON field names instead of the proto names.
    #[serde(default)]
    pub camel_case: bool,

    /// Emit fields holding default values in JSON output.
    #[serde(default)]
    pub emit_defaults: bool,

    /// Forward `traceparent`/`x-b3-*` headers into call metadata.
    #[serde(default = "default_true")]
    pub propagate_tracing: bool,

    /// Method path prefixes that skip authentication.
    #[serde(default)]
    pub skip_auth: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            grpc_addr: default_grpc_addr(),
            metrics_addr: default_metrics_addr(),
            shutdown_timeout: default_shutdown_timeout(),
            max_connection_age: default_max_connection_age(),
            keep_alive: true,
            cors: true,
            auto_http: true,
            camel_case: false,
            emit_defaults: false,
            propagate_tracing: true,
            skip_auth: Vec::new(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_grpc_addr() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_connection_age() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

/// Call logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Log request and response bodies; also masks `password`.
    #[serde(default)]
    pub log_body: bool,

    /// Body fields replaced with `"*"`.
    #[serde(default)]
    pub mask_fields: Vec<String>,

    /// Body fields removed.
    #[serde(default)]
    pub elide_fields: Vec<String>,

    /// Tags copied into every call span.
    #[serde(default = "default_meta_tags")]
    pub meta_tags: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_body: false,
            mask_fields: Vec::new(),
            elide_fields: Vec::new(),
            meta_tags: default_meta_tags(),
        }
    }
}

fn default_meta_tags() -> Vec<String> {
    janus_middleware::stages::logging::DEFAULT_META_TAGS
        .iter()
        .map(ToString::to_string)
        .collect()
}

impl LoggingSection {
    /// Options for the logging stage.
    pub fn to_options(&self) -> LoggingOptions {
        let options = if self.log_body {
            LoggingOptions::with_bodies()
        } else {
            LoggingOptions::new()
        };
        options
            .mask_fields(self.mask_fields.iter().cloned())
            .elide_fields(self.elide_fields.iter().cloned())
            .meta_tags(self.meta_tags.iter().cloned())
    }
}

/// Telemetry section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    /// Service name in logs.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Deployment environment.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log filter directive.
    #[serde(default = "default_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Install the Prometheus recorder.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            level: default_level(),
            format: LogFormat::Json,
            metrics: true,
        }
    }
}

fn default_service_name() -> String {
    "janus".to_string()
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

impl TelemetrySection {
    /// Settings for [`janus_telemetry::init_telemetry`].
    pub fn to_telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig::builder()
            .service_name(&self.service_name)
            .environment(&self.environment)
            .logging(LogConfig {
                level: self.level.clone(),
                format: self.format,
                service_name: self.service_name.clone(),
                ..LogConfig::default()
            })
            .metrics(MetricsConfig {
                enabled: self.metrics,
                service_name: self.service_name.clone(),
                ..MetricsConfig::default()
            })
            .build()
    }
}
