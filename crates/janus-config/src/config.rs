//! Main configuration types.
//!
//! This module provides the top-level [`GatewayConfig`] struct and its builder.

use std::net::SocketAddr;
use std::time::Duration;

use janus_middleware::RouterLimit;
use janus_telemetry::LogFormat;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, LoggingSection, ServerSection, TelemetrySection};

/// Longest accepted listener drain deadline.
pub const MAX_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3600);

/// Complete gateway configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to layer files and environment
/// variables on top of the defaults.
///
/// # Example
///
/// ```
/// use janus_config::GatewayConfig;
///
/// let config = GatewayConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Listeners and feature flags.
    #[serde(default)]
    pub server: ServerSection,

    /// Call logging.
    #[serde(default)]
    pub logging: LoggingSection,

    /// Rate limit rules.
    #[serde(default)]
    pub limits: RouterLimit,

    /// Log and metrics setup.
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// Parses a listener address. A leading `:` means all interfaces.
///
/// ```
/// use janus_config::listen_addr;
///
/// assert_eq!(listen_addr(":8080").unwrap().to_string(), "0.0.0.0:8080");
/// assert!(listen_addr("localhost").is_err());
/// ```
pub fn listen_addr(addr: &str) -> Result<SocketAddr, std::net::AddrParseError> {
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}").parse(),
        None => addr.parse(),
    }
}

impl GatewayConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first bad field:
    /// - a listener address that is not a socket address (the metrics
    ///   address may be empty to turn the metrics listener off)
    /// - two listeners bound to the same fixed port
    /// - a shutdown timeout of zero or above one hour
    /// - a zero connection age while keep-alive is on
    /// - a positive quota with a zero window
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        let http = checked_addr("server.http_addr", &server.http_addr)?;
        let grpc = checked_addr("server.grpc_addr", &server.grpc_addr)?;
        let metrics = if server.metrics_addr.is_empty() {
            None
        } else {
            Some(checked_addr("server.metrics_addr", &server.metrics_addr)?)
        };

        let mut bound = vec![("server.http_addr", http), ("server.grpc_addr", grpc)];
        bound.extend(metrics.map(|addr| ("server.metrics_addr", addr)));
        for (i, (field, addr)) in bound.iter().enumerate() {
            if addr.port() == 0 {
                continue;
            }
            if let Some((other, _)) = bound[..i].iter().find(|(_, seen)| seen.port() == addr.port()) {
                return Err(ConfigError::invalid_value(
                    *field,
                    format!("port {} already used by {other}", addr.port()),
                ));
            }
        }

        if server.shutdown_timeout.is_zero() || server.shutdown_timeout > MAX_SHUTDOWN_TIMEOUT {
            return Err(ConfigError::invalid_value(
                "server.shutdown_timeout",
                "must be greater than zero and at most 1h",
            ));
        }
        if server.keep_alive && server.max_connection_age.is_zero() {
            return Err(ConfigError::invalid_value(
                "server.max_connection_age",
                "must be greater than zero when keep_alive is on",
            ));
        }

        for (i, limit) in self.limits.limit.iter().enumerate() {
            if limit.quota > 0 && limit.duration.is_zero() {
                return Err(ConfigError::invalid_value(
                    format!("limits.limit[{i}].duration"),
                    "a positive quota needs a window",
                ));
            }
        }
        for (i, allow) in self.limits.allow.iter().enumerate() {
            if allow.quota > 0 && allow.duration.is_zero() {
                return Err(ConfigError::invalid_value(
                    format!("limits.allow[{i}].duration"),
                    "a positive quota needs a window",
                ));
            }
        }
        if self.limits.default.quota > 0 && self.limits.default.duration.is_zero() {
            return Err(ConfigError::invalid_value(
                "limits.default.duration",
                "a positive quota needs a window",
            ));
        }

        if self.logging.meta_tags.iter().any(String::is_empty) {
            return Err(ConfigError::invalid_value("logging.meta_tags", "empty tag name"));
        }
        if self.telemetry.service_name.is_empty() {
            return Err(ConfigError::invalid_value("telemetry.service_name", "must not be empty"));
        }

        Ok(())
    }

    /// Local development preset: pretty debug logs with bodies, no limits.
    ///
    /// ```
    /// use janus_config::GatewayConfig;
    ///
    /// let config = GatewayConfig::development();
    /// assert_eq!(config.telemetry.level, "debug");
    /// assert!(config.logging.log_body);
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.telemetry.level = "debug".to_string();
        config.telemetry.format = LogFormat::Pretty;
        config.telemetry.environment = "development".to_string();

        config.logging.log_body = true;
        config.limits.disabled = true;

        // quick restarts
        config.server.shutdown_timeout = Duration::from_secs(5);

        config
    }

    /// Production preset: JSON logs at info, limits enforced.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.telemetry.level = "info".to_string();
        config.telemetry.format = LogFormat::Json;
        config.telemetry.environment = "production".to_string();

        config.logging.log_body = false;
        config.limits.disabled = false;

        config
    }
}

fn checked_addr(field: &str, addr: &str) -> Result<SocketAddr, ConfigError> {
    listen_addr(addr).map_err(|_| ConfigError::invalid_value(field, format!("invalid socket address: {addr}")))
}

/// Builder for [`GatewayConfig`].
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    server: Option<ServerSection>,
    logging: Option<LoggingSection>,
    limits: Option<RouterLimit>,
    telemetry: Option<TelemetrySection>,
}

impl GatewayConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server section.
    #[must_use]
    pub fn server(mut self, server: ServerSection) -> Self {
        self.server = Some(server);
        self
    }

    /// Set the logging section.
    #[must_use]
    pub fn logging(mut self, logging: LoggingSection) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Set the rate limit rules.
    #[must_use]
    pub fn limits(mut self, limits: RouterLimit) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Set the telemetry section.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetrySection) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Build the configuration. Unset sections use their defaults.
    #[must_use]
    pub fn build(self) -> GatewayConfig {
        GatewayConfig {
            server: self.server.unwrap_or_default(),
            logging: self.logging.unwrap_or_default(),
            limits: self.limits.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<GatewayConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
