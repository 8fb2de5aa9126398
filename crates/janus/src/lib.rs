//! # Janus
//!
//! **Dual-protocol gRPC and JSON/HTTP serving gateway**
//!
//! Register typed handlers once and serve them over both protocols:
//!
//! - native gRPC on its own listener
//! - JSON (or protobuf) over HTTP/1.1 and HTTP/2 through the bridge
//! - self-calls through an in-memory channel
//!
//! Every call, whatever its protocol, runs through one interceptor
//! pipeline (validation, authentication, metrics, logging, rate limiting,
//! panic recovery), and the server drains in-flight calls on shutdown.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use janus::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
//! struct Ping {
//!     #[prost(string, tag = "1")]
//!     #[serde(default)]
//!     text: String,
//! }
//!
//! impl janus::core::Message for Ping {}
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::from_env()?;
//!
//!     let mut services = ServiceRegistry::new();
//!     services.register_unary("demo.Pinger", "Ping", |_ctx: CallContext, req: Ping| async move {
//!         Ok::<_, Status>(req)
//!     })?;
//!
//!     Server::builder()
//!         .config(ServerConfig::from_gateway(&config))
//!         .services(services)
//!         .build()?
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! gRPC ──────┐
//! HTTP/JSON ─┼─→ Pipeline ─→ handler
//! memory ────┘
//! ```

#![doc(html_root_url = "https://docs.rs/janus/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use janus_core as core;

// Re-export server types
pub use janus_server as server;

// Re-export middleware types
pub use janus_middleware as middleware;

// Re-export telemetry types
pub use janus_telemetry as telemetry;

// Re-export configuration types
pub use janus_config as config;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use janus::prelude::*;
///
/// let status = Status::not_found("order missing");
/// assert_eq!(status.code(), Code::NOT_FOUND);
/// ```
pub mod prelude {
    pub use janus_core::{
        CallContext, CloserStack, Code, CodeRegistry, Message, MessageStream, Status,
    };

    pub use janus_server::{
        Client, Lifecycle, LifecycleError, Running, Server, ServerConfig, ServerError,
        ServiceRegistry, ServingStatus,
    };

    pub use janus_middleware::{Pipeline, RouterLimit};

    pub use janus_middleware::stages::{LoggingOptions, RateLimitInterceptor};

    pub use janus_config::{ConfigLoader, GatewayConfig};

    pub use janus_telemetry::init_telemetry;
}
