//! Built-in pipeline stages.
//!
//! Each stage is an [`Interceptor`](crate::Interceptor) that handles both
//! unary and streaming payloads. [`PipelineBuilder`](crate::PipelineBuilder)
//! places them in [`Stage`](crate::Stage) order.

pub mod auth;
pub mod authz;
pub mod body;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod recovery;
pub mod validation;

pub use auth::{bearer_token, AuthInterceptor, Authenticator};
pub use authz::{AuthorizationInterceptor, AuthorizationPolicy, AuthzDecision, PolicyError, StaticPolicy};
pub use body::BodyEncoder;
pub use logging::{body_decider, default_decider, level_for, Decider, Decision, LoggingInterceptor, LoggingOptions};
pub use metrics::{MetricsInterceptor, HANDLING_BUCKETS};
pub use rate_limit::{LimiterError, LocalTokenStore, RateLimitInterceptor, TakeResult, TokenStore};
pub use recovery::{panics_recovered, RecoveryInterceptor};
pub use validation::ValidationInterceptor;
