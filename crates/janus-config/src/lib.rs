//! Typed configuration for the Janus gateway.
//!
//! - TOML and JSON configuration files
//! - `.env` files and `JANUS__SECTION__KEY` environment overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env), merged key by key
//!
//! # Overview
//!
//! [`GatewayConfig`] has four sections:
//!
//! - [`ServerSection`] - listener addresses, drain timing, feature flags
//! - [`LoggingSection`] - body logging, masked/elided fields, span tags
//! - `limits` - rate limit rules ([`RouterLimit`](janus_middleware::RouterLimit))
//! - [`TelemetrySection`] - log level and format, service name, metrics
//!
//! # Example
//!
//! ```no_run
//! use janus_config::ConfigLoader;
//!
//! # fn main() -> Result<(), janus_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_file("config.toml")?
//!     .with_env_prefix("JANUS")
//!     .load()?;
//!
//! println!("bridging HTTP on {}", config.server.http_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! grpc_addr = "0.0.0.0:8081"
//! metrics_addr = "0.0.0.0:9090"
//! shutdown_timeout = "30s"
//! camel_case = false
//! skip_auth = ["/demo.Public/"]
//!
//! [logging]
//! log_body = true
//! mask_fields = ["card_number"]
//!
//! [limits]
//! block = [{ key = "x-client-id", value = "scraper" }]
//!
//! [[limits.limit]]
//! prefix = "/billing."
//! headers = ["x-client-id"]
//! quota = 100
//! duration = "1m"
//!
//! [telemetry]
//! service_name = "billing"
//! level = "info"
//! format = "json"
//! ```
//!
//! Durations are strings such as `"250ms"`, `"30s"` or `"1m30s"`; see
//! [`parse_duration`].

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{listen_addr, GatewayConfig, GatewayConfigBuilder, MAX_SHUTDOWN_TIMEOUT};
pub use error::ConfigError;
pub use janus_core::duration::{format_duration, parse_duration};
pub use loader::{ConfigLoader, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH, ENV_PREFIX};
pub use schema::{LoggingSection, ServerSection, TelemetrySection};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.http_addr, "0.0.0.0:8080");
        assert_eq!(config.server.shutdown_timeout, parse_duration("30s").unwrap());
    }

    #[test]
    fn test_documented_file_parses() {
        let text = r#"
[server]
skip_auth = ["/demo.Public/"]

[limits]
block = [{ key = "x-client-id", value = "scraper" }]

[[limits.limit]]
prefix = "/billing."
headers = ["x-client-id"]
quota = 100
duration = "1m"
"#;
        let config = ConfigLoader::new().with_string(text, "toml").unwrap().load().unwrap();
        assert_eq!(config.server.skip_auth, ["/demo.Public/"]);
        assert_eq!(config.limits.block.len(), 1);
        assert_eq!(format_duration(config.limits.limit[0].duration), "1m");
    }
}
