//! Fixed-order interceptor pipeline.
//!
//! Every call, native or bridged, unary or streaming, flows through one
//! chain whose order is fixed by [`Stage`]:
//!
//! 1. **Validation** - `Message::validate()` on every input message
//! 2. **Auth** - authenticate the caller
//! 3. **Authz** - authorization policy and audit
//! 4. **Metrics** - request counters and latency histogram
//! 5. **Logging** - call span and the "finished call" record
//! 6. **RateLimit** - route limit rules and token store
//! 7. **Custom** - user interceptors, in registration order
//! 8. **Recovery** - panic containment, innermost
//!
//! Stages may be left out, but not reordered: the builder sorts by stage
//! when the pipeline is built, and the result is read-only.

use std::sync::Arc;

use crate::call::{CallRequest, CallResult};
use crate::interceptor::{BoxedInterceptor, CallHandler, Interceptor, Next};
use crate::stages::{
    AuthInterceptor, Authenticator, AuthorizationInterceptor, AuthorizationPolicy,
    LoggingInterceptor, LoggingOptions, MetricsInterceptor, RateLimitInterceptor,
    RecoveryInterceptor, ValidationInterceptor,
};

/// Pipeline position of an interceptor, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Input validation.
    Validation = 1,
    /// Authentication.
    Auth = 2,
    /// Authorization and audit.
    Authz = 3,
    /// Metrics.
    Metrics = 4,
    /// Structured logging.
    Logging = 5,
    /// Rate limiting.
    RateLimit = 6,
    /// User interceptors.
    Custom = 7,
    /// Panic recovery.
    Recovery = 8,
}

impl Stage {
    /// All stages in order.
    #[must_use]
    pub const fn all() -> [Self; 8] {
        [
            Self::Validation,
            Self::Auth,
            Self::Authz,
            Self::Metrics,
            Self::Logging,
            Self::RateLimit,
            Self::Custom,
            Self::Recovery,
        ]
    }

    /// Stage name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::Authz => "authz",
            Self::Metrics => "metrics",
            Self::Logging => "logging",
            Self::RateLimit => "rate_limit",
            Self::Custom => "custom",
            Self::Recovery => "recovery",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The built, immutable interceptor chain.
///
/// Cheap to clone; clones share the chain.
#[derive(Clone)]
pub struct Pipeline {
    chain: Arc<[BoxedInterceptor]>,
    stages: Arc<[Stage]>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("interceptors", &self.interceptor_names())
            .finish()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        PipelineBuilder::new().build()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Runs a call through the chain and then `handler`.
    pub async fn call(&self, request: CallRequest, handler: &CallHandler) -> CallResult {
        Next::new(&self.chain, handler).run(request).await
    }

    /// Interceptor names in execution order.
    #[must_use]
    pub fn interceptor_names(&self) -> Vec<&'static str> {
        self.chain.iter().map(|i| i.name()).collect()
    }

    /// Stage of each interceptor, in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Number of interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Whether the chain is empty (calls go straight to the handler).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

/// Builder for a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    entries: Vec<(Stage, BoxedInterceptor)>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an interceptor at a stage. Within a stage, registration order is kept.
    #[must_use]
    pub fn stage<I: Interceptor>(mut self, stage: Stage, interceptor: I) -> Self {
        self.entries.push((stage, Arc::new(interceptor)));
        self
    }

    /// Adds input validation.
    #[must_use]
    pub fn validation(self) -> Self {
        self.stage(Stage::Validation, ValidationInterceptor::new())
    }

    /// Adds authentication, skipped for the given method prefixes and the health service.
    #[must_use]
    pub fn authenticator<A: Authenticator>(self, authenticator: A, skip_prefixes: Vec<String>) -> Self {
        self.stage(
            Stage::Auth,
            AuthInterceptor::new(authenticator).skip_prefixes(skip_prefixes),
        )
    }

    /// Adds an authorization policy.
    #[must_use]
    pub fn authorization<P: AuthorizationPolicy>(self, policy: P) -> Self {
        self.stage(Stage::Authz, AuthorizationInterceptor::new(policy))
    }

    /// Adds call metrics.
    #[must_use]
    pub fn metrics(self) -> Self {
        self.stage(Stage::Metrics, MetricsInterceptor::new())
    }

    /// Adds structured logging.
    #[must_use]
    pub fn logging(self, options: LoggingOptions) -> Self {
        self.stage(Stage::Logging, LoggingInterceptor::new(options))
    }

    /// Adds rate limiting.
    #[must_use]
    pub fn rate_limit(self, limiter: RateLimitInterceptor) -> Self {
        self.stage(Stage::RateLimit, limiter)
    }

    /// Adds a user interceptor.
    #[must_use]
    pub fn interceptor<I: Interceptor>(self, interceptor: I) -> Self {
        self.stage(Stage::Custom, interceptor)
    }

    /// Adds panic recovery unless `PANIC_RECOVERY=false`.
    #[must_use]
    pub fn recovery(self) -> Self {
        if RecoveryInterceptor::enabled_by_env() {
            self.stage(Stage::Recovery, RecoveryInterceptor::new())
        } else {
            tracing::info!("panic recovery disabled by PANIC_RECOVERY");
            self
        }
    }

    /// Folds the registered interceptors into the final chain.
    #[must_use]
    pub fn build(mut self) -> Pipeline {
        // stable: custom interceptors keep registration order
        self.entries.sort_by_key(|(stage, _)| *stage);
        let stages = self.entries.iter().map(|(stage, _)| *stage).collect();
        let chain = self.entries.into_iter().map(|(_, i)| i).collect();
        Pipeline { chain, stages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CallResponse, Payload};
    use crate::interceptor::BoxFuture;
    use crate::FnInterceptor;
    use janus_core::{CallContext, CallKind, CallMeta, Protocol};
    use parking_lot::Mutex;

    #[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
    struct Empty {}

    impl janus_core::Message for Empty {}

    struct Tag(&'static str, Arc<Mutex<Vec<&'static str>>>);

    impl Interceptor for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        fn intercept<'a>(&'a self, request: CallRequest, next: Next<'a>) -> BoxFuture<'a, CallResult> {
            self.1.lock().push(self.0);
            next.run(request)
        }
    }

    #[test]
    fn test_stage_order() {
        let stages = Stage::all();
        assert_eq!(stages[0].name(), "validation");
        assert_eq!(stages[7].name(), "recovery");
        assert!(stages.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_build_sorts_by_stage() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .stage(Stage::Recovery, Tag("recovery", Arc::clone(&log)))
            .interceptor(Tag("custom-a", Arc::clone(&log)))
            .stage(Stage::Validation, Tag("validation", Arc::clone(&log)))
            .interceptor(Tag("custom-b", Arc::clone(&log)))
            .stage(Stage::Auth, Tag("auth", Arc::clone(&log)))
            .build();

        assert_eq!(
            pipeline.interceptor_names(),
            vec!["validation", "auth", "custom-a", "custom-b", "recovery"]
        );

        let handler: CallHandler = Arc::new(|request: CallRequest| -> BoxFuture<'static, CallResult> {
            Box::pin(async move { Ok(CallResponse::new(request.payload)) })
        });
        let meta = Arc::new(CallMeta::server("demo.Svc", "Do", CallKind::Unary));
        let request = CallRequest::new(
            CallContext::new(meta, Protocol::Http, http::HeaderMap::new()),
            Payload::Unary(Box::new(Empty {})),
        );
        pipeline.call(request, &handler).await.unwrap();
        assert_eq!(
            *log.lock(),
            vec!["validation", "auth", "custom-a", "custom-b", "recovery"]
        );
    }

    #[test]
    fn test_empty_pipeline() {
        let pipeline = Pipeline::default();
        assert!(pipeline.is_empty());
        let with_fn = Pipeline::builder()
            .interceptor(FnInterceptor::new("noop", |request, next| next.run(request)))
            .build();
        assert_eq!(with_fn.len(), 1);
        assert_eq!(with_fn.stages(), &[Stage::Custom]);
    }
}
