//! Runtime server settings.
//!
//! [`ServerConfig`] is the immutable view the listeners read while
//! serving. It is usually derived from the `server` section of a
//! [`GatewayConfig`]; the builder covers tests and embedding.
//!
//! # Example
//!
//! ```rust
//! use janus_server::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .http_addr("127.0.0.1:0")
//!     .grpc_addr("127.0.0.1:0")
//!     .metrics_addr("")
//!     .shutdown_timeout(Duration::from_secs(5))
//!     .build();
//!
//! assert_eq!(config.http_addr(), "127.0.0.1:0");
//! assert!(config.metrics_socket_addr().unwrap().is_none());
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use janus_config::{listen_addr, GatewayConfig, ServerSection};
use janus_core::FieldNaming;

use crate::error::ServerError;
use crate::marshal::JsonMarshaler;
use crate::shutdown::pre_stop_delay;

/// Default JSON/HTTP listener address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Default gRPC listener address.
pub const DEFAULT_GRPC_ADDR: &str = "0.0.0.0:8081";

/// Default metrics listener address.
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";

/// Default drain deadline per listener.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum age of a gRPC connection.
pub const DEFAULT_MAX_CONNECTION_AGE: Duration = Duration::from_secs(60);

/// Settings read by the listeners.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    http_addr: String,
    grpc_addr: String,
    metrics_addr: String,
    shutdown_timeout: Duration,
    max_connection_age: Duration,
    pre_stop: Option<Duration>,
    keep_alive: bool,
    cors: bool,
    auto_http: bool,
    propagate_tracing: bool,
    marshaler: JsonMarshaler,
    skip_auth: Vec<String>,
}

impl ServerConfig {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Settings from the `server` section of a gateway config.
    ///
    /// The pre-stop delay comes from the `PRE_STOP` environment variable.
    #[must_use]
    pub fn from_gateway(config: &GatewayConfig) -> Self {
        Self::from_section(&config.server)
    }

    /// Settings from a `server` section.
    #[must_use]
    pub fn from_section(section: &ServerSection) -> Self {
        let naming = if section.camel_case {
            FieldNaming::CamelCase
        } else {
            FieldNaming::SnakeCase
        };
        Self::builder()
            .http_addr(&section.http_addr)
            .grpc_addr(&section.grpc_addr)
            .metrics_addr(&section.metrics_addr)
            .shutdown_timeout(section.shutdown_timeout)
            .max_connection_age(section.max_connection_age)
            .pre_stop(pre_stop_delay())
            .keep_alive(section.keep_alive)
            .cors(section.cors)
            .auto_http(section.auto_http)
            .propagate_tracing(section.propagate_tracing)
            .marshaler(JsonMarshaler::new(naming, section.emit_defaults))
            .skip_auth(section.skip_auth.clone())
            .build()
    }

    /// JSON/HTTP listener address as configured.
    #[must_use]
    pub fn http_addr(&self) -> &str {
        &self.http_addr
    }

    /// gRPC listener address as configured.
    #[must_use]
    pub fn grpc_addr(&self) -> &str {
        &self.grpc_addr
    }

    /// Metrics listener address; empty when disabled.
    #[must_use]
    pub fn metrics_addr(&self) -> &str {
        &self.metrics_addr
    }

    /// Parsed HTTP address.
    ///
    /// # Errors
    ///
    /// `InvalidAddress` if it does not parse.
    pub fn http_socket_addr(&self) -> Result<SocketAddr, ServerError> {
        parse_addr("http", &self.http_addr)
    }

    /// Parsed gRPC address.
    ///
    /// # Errors
    ///
    /// `InvalidAddress` if it does not parse.
    pub fn grpc_socket_addr(&self) -> Result<SocketAddr, ServerError> {
        parse_addr("grpc", &self.grpc_addr)
    }

    /// Parsed metrics address; `None` when the listener is disabled.
    ///
    /// # Errors
    ///
    /// `InvalidAddress` if it is set and does not parse.
    pub fn metrics_socket_addr(&self) -> Result<Option<SocketAddr>, ServerError> {
        if self.metrics_addr.is_empty() {
            return Ok(None);
        }
        parse_addr("metrics", &self.metrics_addr).map(Some)
    }

    /// Drain deadline per listener.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Maximum age of a gRPC connection; `None` with keep-alive off.
    #[must_use]
    pub const fn max_connection_age(&self) -> Option<Duration> {
        if self.keep_alive {
            Some(self.max_connection_age)
        } else {
            None
        }
    }

    /// Delay between `NOT_SERVING` and closing the listeners.
    #[must_use]
    pub const fn pre_stop(&self) -> Option<Duration> {
        self.pre_stop
    }

    /// Whether HTTP keep-alive is on.
    #[must_use]
    pub const fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Whether CORS headers are written.
    #[must_use]
    pub const fn cors(&self) -> bool {
        self.cors
    }

    /// Whether every method gets a `POST /<service>/<method>` route.
    #[must_use]
    pub const fn auto_http(&self) -> bool {
        self.auto_http
    }

    /// Whether tracing headers are copied into call metadata.
    #[must_use]
    pub const fn propagate_tracing(&self) -> bool {
        self.propagate_tracing
    }

    /// JSON marshaler for bridged calls and error bodies.
    #[must_use]
    pub const fn marshaler(&self) -> JsonMarshaler {
        self.marshaler
    }

    /// Method prefixes that skip authentication.
    #[must_use]
    pub fn skip_auth(&self) -> &[String] {
        &self.skip_auth
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn parse_addr(listener: &'static str, addr: &str) -> Result<SocketAddr, ServerError> {
    listen_addr(addr).map_err(|_| ServerError::InvalidAddress {
        listener,
        addr: addr.to_string(),
    })
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self {
            config: ServerConfig {
                http_addr: DEFAULT_HTTP_ADDR.to_string(),
                grpc_addr: DEFAULT_GRPC_ADDR.to_string(),
                metrics_addr: DEFAULT_METRICS_ADDR.to_string(),
                shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
                max_connection_age: DEFAULT_MAX_CONNECTION_AGE,
                pre_stop: None,
                keep_alive: true,
                cors: true,
                auto_http: true,
                propagate_tracing: true,
                marshaler: JsonMarshaler::default(),
                skip_auth: Vec::new(),
            },
        }
    }
}

impl ServerConfigBuilder {
    /// Sets the JSON/HTTP listener address.
    #[must_use]
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.http_addr = addr.into();
        self
    }

    /// Sets the gRPC listener address.
    #[must_use]
    pub fn grpc_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.grpc_addr = addr.into();
        self
    }

    /// Sets the metrics listener address; empty disables it.
    #[must_use]
    pub fn metrics_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.metrics_addr = addr.into();
        self
    }

    /// Sets the drain deadline per listener.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Sets the maximum age of gRPC connections.
    #[must_use]
    pub fn max_connection_age(mut self, age: Duration) -> Self {
        self.config.max_connection_age = age;
        self
    }

    /// Sets the pre-stop delay.
    #[must_use]
    pub fn pre_stop(mut self, delay: Option<Duration>) -> Self {
        self.config.pre_stop = delay;
        self
    }

    /// Turns keep-alive on or off.
    #[must_use]
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.config.keep_alive = enabled;
        self
    }

    /// Turns CORS headers on or off.
    #[must_use]
    pub fn cors(mut self, enabled: bool) -> Self {
        self.config.cors = enabled;
        self
    }

    /// Turns automatic HTTP routes on or off.
    #[must_use]
    pub fn auto_http(mut self, enabled: bool) -> Self {
        self.config.auto_http = enabled;
        self
    }

    /// Turns tracing header propagation on or off.
    #[must_use]
    pub fn propagate_tracing(mut self, enabled: bool) -> Self {
        self.config.propagate_tracing = enabled;
        self
    }

    /// Sets the JSON marshaler.
    #[must_use]
    pub fn marshaler(mut self, marshaler: JsonMarshaler) -> Self {
        self.config.marshaler = marshaler;
        self
    }

    /// Sets the method prefixes that skip authentication.
    #[must_use]
    pub fn skip_auth(mut self, prefixes: Vec<String>) -> Self {
        self.config.skip_auth = prefixes;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        self.config
    }
}
