//! Telemetry configuration.

use crate::logging::{LogConfig, LogFormat};
use crate::metrics::MetricsConfig;

/// Configuration for all telemetry subsystems.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name (used in logs and metric descriptions).
    pub service_name: String,

    /// Service version.
    pub service_version: String,

    /// Environment (production, staging, development).
    pub environment: String,

    /// Metrics configuration.
    pub metrics: MetricsConfig,

    /// Logging configuration.
    pub logging: LogConfig,
}

impl TelemetryConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::new()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "janus".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            metrics: MetricsConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

/// Builder for [`TelemetryConfig`].
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    service_name: Option<String>,
    service_version: Option<String>,
    environment: Option<String>,
    metrics: Option<MetricsConfig>,
    logging: Option<LogConfig>,
}

impl TelemetryConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service name.
    #[must_use]
    pub fn service_name(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    /// Sets the service version.
    #[must_use]
    pub fn service_version(mut self, version: &str) -> Self {
        self.service_version = Some(version.to_string());
        self
    }

    /// Sets the environment.
    #[must_use]
    pub fn environment(mut self, env: &str) -> Self {
        self.environment = Some(env.to_string());
        self
    }

    /// Sets the metrics configuration.
    #[must_use]
    pub fn metrics(mut self, config: MetricsConfig) -> Self {
        self.metrics = Some(config);
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn logging(mut self, config: LogConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Sets the log filter directive.
    #[must_use]
    pub fn log_level(mut self, level: &str) -> Self {
        let config = self.logging.take().unwrap_or_default();
        self.logging = Some(LogConfig {
            level: level.to_string(),
            ..config
        });
        self
    }

    /// Sets the log output format.
    #[must_use]
    pub fn log_format(mut self, format: LogFormat) -> Self {
        let config = self.logging.take().unwrap_or_default();
        self.logging = Some(LogConfig { format, ..config });
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        let defaults = TelemetryConfig::default();

        let service_name = self.service_name.unwrap_or(defaults.service_name);
        let service_version = self.service_version.unwrap_or(defaults.service_version);
        let environment = self.environment.unwrap_or(defaults.environment);

        let mut metrics = self.metrics.unwrap_or(defaults.metrics);
        metrics.service_name = service_name.clone();

        let mut logging = self.logging.unwrap_or(defaults.logging);
        logging.service_name = service_name.clone();

        TelemetryConfig {
            service_name,
            service_version,
            environment,
            metrics,
            logging,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "janus");
        assert_eq!(config.environment, "development");
    }

    #[test]
    fn test_builder_propagates_service_name() {
        let config = TelemetryConfig::builder()
            .service_name("echo")
            .service_version("2.0.0")
            .environment("production")
            .build();

        assert_eq!(config.service_version, "2.0.0");
        assert_eq!(config.metrics.service_name, "echo");
        assert_eq!(config.logging.service_name, "echo");
    }

    #[test]
    fn test_builder_log_settings() {
        let config = TelemetryConfig::builder()
            .log_level("debug")
            .log_format(LogFormat::Compact)
            .build();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Compact);
    }
}
