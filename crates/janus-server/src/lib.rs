//! # Janus Server
//!
//! Listeners of the Janus dual-protocol gateway.
//!
//! One set of typed handlers is registered in a [`ServiceRegistry`] and
//! served twice: natively over gRPC, and over JSON/HTTP through the
//! [`bridge`]. Both front ends run every call through the same
//! interceptor [`Pipeline`](janus_middleware::Pipeline).
//!
//! - [`grpc`]: HTTP/2 gRPC front end on top of `tonic`
//! - [`http`]: HTTP/1.1 and HTTP/2 JSON front end with built-in paths
//! - [`memory`]: in-process transport for self-calls
//! - [`server`]: listeners, lifecycle and graceful shutdown
//!
//! ## Example
//!
//! ```rust,no_run
//! use janus_core::{CallContext, Status};
//! use janus_server::{Server, ServerConfig, ServiceRegistry};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
//! struct Greeting {
//!     #[prost(string, tag = "1")]
//!     #[serde(default)]
//!     text: String,
//! }
//!
//! impl janus_core::Message for Greeting {}
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut services = ServiceRegistry::new();
//!     services.register_unary("demo.Greeter", "Hello", |_ctx: CallContext, req: Greeting| async move {
//!         Ok::<_, Status>(Greeting { text: format!("hello {}", req.text) })
//!     })?;
//!
//!     Server::builder()
//!         .config(ServerConfig::default())
//!         .services(services)
//!         .build()?
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/janus-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod bridge;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod grpc;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod marshal;
pub mod memory;
pub mod router;
pub mod server;
pub mod service;
pub mod shutdown;

pub use bridge::{Bridge, WireFormat};
pub use client::Client;
pub use codec::DynCodec;
pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{RegistrationError, ServerError, ServerResult, TransportError};
pub use health::{HealthRegistry, ServingStatus};
pub use lifecycle::{Lifecycle, LifecycleError, LifecycleResult};
pub use marshal::JsonMarshaler;
pub use memory::{memory_channel, MemoryListener};
pub use router::{custom_handler, CustomHandler, PathParams, RouteTable, RouteTarget};
pub use server::{Running, Server, ServerBuilder, ServerState};
pub use service::{MethodDesc, ServiceRegistry};
pub use shutdown::ShutdownHandle;
