//! # Janus Middleware
//!
//! The interceptor pipeline shared by both Janus front ends.
//!
//! A call, whether it arrived as native gRPC or as JSON over HTTP, is
//! turned into a [`CallRequest`] and run through one [`Pipeline`] before
//! reaching the business handler:
//!
//! ```text
//! Validation → Auth → Authz → Metrics → Logging → RateLimit → Custom → Recovery → Handler
//! ```
//!
//! | Stage | Interceptor                 | Purpose                                  |
//! |-------|-----------------------------|------------------------------------------|
//! | 1     | [`ValidationInterceptor`]   | `Message::validate()` on every input     |
//! | 2     | [`AuthInterceptor`]         | authenticate, store [`AuthInfo`]         |
//! | 3     | [`AuthorizationInterceptor`]| policy check and audit record            |
//! | 4     | [`MetricsInterceptor`]      | call counters and latency histogram      |
//! | 5     | [`LoggingInterceptor`]      | call span and "finished call" record     |
//! | 6     | [`RateLimitInterceptor`]    | route limit rules                        |
//! | 7     | custom                      | user interceptors                        |
//! | 8     | [`RecoveryInterceptor`]     | panic containment                        |
//!
//! Unary and streaming calls go through the same chain in the same order;
//! stages that act per message wrap the stream (see [`observe`]).
//!
//! ## Example
//!
//! ```
//! use janus_middleware::{Pipeline, Stage};
//! use janus_middleware::stages::LoggingOptions;
//!
//! let pipeline = Pipeline::builder()
//!     .recovery()
//!     .validation()
//!     .logging(LoggingOptions::default())
//!     .build();
//!
//! assert_eq!(pipeline.stages().first(), Some(&Stage::Validation));
//! ```
//!
//! [`AuthInfo`]: janus_core::AuthInfo
//! [`ValidationInterceptor`]: stages::ValidationInterceptor
//! [`AuthInterceptor`]: stages::AuthInterceptor
//! [`AuthorizationInterceptor`]: stages::AuthorizationInterceptor
//! [`MetricsInterceptor`]: stages::MetricsInterceptor
//! [`LoggingInterceptor`]: stages::LoggingInterceptor
//! [`RateLimitInterceptor`]: stages::RateLimitInterceptor
//! [`RecoveryInterceptor`]: stages::RecoveryInterceptor

#![doc(html_root_url = "https://docs.rs/janus-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod call;
pub mod interceptor;
pub mod limit;
pub mod observe;
pub mod pipeline;
pub mod stages;

/// Service name of the standard health service; never authenticated or logged.
pub const HEALTH_SERVICE: &str = "grpc.health.v1.Health";

pub use call::{CallRequest, CallResponse, CallResult, Payload};
pub use interceptor::{BoxFuture, BoxedInterceptor, CallHandler, FnInterceptor, Interceptor, Next};
pub use limit::{LimitOutcome, RouterLimit};
pub use observe::{ObservedStream, StreamEnd};
pub use pipeline::{Pipeline, PipelineBuilder, Stage};
