//! Core interceptor trait and chain types.
//!
//! This module defines the [`Interceptor`] trait that every pipeline stage
//! implements. An interceptor receives the call, may inspect or replace it,
//! invokes the rest of the chain through [`Next`], and may inspect or
//! replace the outcome.
//!
//! The same trait serves unary and streaming calls: the payload is either a
//! single message or a message stream (see [`Payload`]), so a chain built
//! once applies to both shapes in the same order.
//!
//! # Example
//!
//! ```
//! use janus_middleware::{BoxFuture, CallRequest, CallResult, Interceptor, Next};
//!
//! struct Tagging;
//!
//! impl Interceptor for Tagging {
//!     fn name(&self) -> &'static str {
//!         "tagging"
//!     }
//!
//!     fn intercept<'a>(&'a self, request: CallRequest, next: Next<'a>) -> BoxFuture<'a, CallResult> {
//!         Box::pin(async move {
//!             tracing::debug!(method = %request.ctx.meta().full_method(), "tagging call");
//!             next.run(request).await
//!         })
//!     }
//! }
//! ```
//!
//! [`Payload`]: crate::call::Payload

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::call::{CallRequest, CallResult};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Terminal handler at the end of a chain.
pub type CallHandler = Arc<dyn Fn(CallRequest) -> BoxFuture<'static, CallResult> + Send + Sync>;

/// A shared interceptor.
pub type BoxedInterceptor = Arc<dyn Interceptor>;

/// A composable wrapper around a call.
///
/// # Invariants
///
/// - An interceptor calls `next.run()` at most once; not calling it
///   short-circuits the chain with the interceptor's own result
/// - Errors from downstream are passed through unless the stage exists to
///   translate them (recovery)
pub trait Interceptor: Send + Sync + 'static {
    /// Stage name used in logs and debugging.
    fn name(&self) -> &'static str;

    /// Processes the call.
    fn intercept<'a>(&'a self, request: CallRequest, next: Next<'a>) -> BoxFuture<'a, CallResult>;
}

/// The remainder of an interceptor chain.
///
/// Consumed by [`run`](Next::run), so it can be invoked once.
pub struct Next<'a> {
    chain: &'a [BoxedInterceptor],
    handler: &'a CallHandler,
}

impl<'a> Next<'a> {
    /// Creates a chain that runs `chain` in order, then `handler`.
    pub fn new(chain: &'a [BoxedInterceptor], handler: &'a CallHandler) -> Self {
        Self { chain, handler }
    }

    /// Number of interceptors left before the handler.
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }

    /// Invokes the next interceptor, or the handler at the end of the chain.
    pub fn run(self, request: CallRequest) -> BoxFuture<'a, CallResult> {
        match self.chain.split_first() {
            Some((head, rest)) => head.intercept(
                request,
                Next {
                    chain: rest,
                    handler: self.handler,
                },
            ),
            None => (self.handler)(request),
        }
    }
}

/// An interceptor built from a closure.
///
/// ```
/// use janus_middleware::{FnInterceptor, Interceptor};
///
/// let passthrough = FnInterceptor::new("passthrough", |request, next| next.run(request));
/// assert_eq!(passthrough.name(), "passthrough");
/// ```
pub struct FnInterceptor<F> {
    name: &'static str,
    func: F,
}

impl<F> FnInterceptor<F>
where
    F: for<'a> Fn(CallRequest, Next<'a>) -> BoxFuture<'a, CallResult> + Send + Sync + 'static,
{
    /// Creates a named closure interceptor.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> Interceptor for FnInterceptor<F>
where
    F: for<'a> Fn(CallRequest, Next<'a>) -> BoxFuture<'a, CallResult> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn intercept<'a>(&'a self, request: CallRequest, next: Next<'a>) -> BoxFuture<'a, CallResult> {
        (self.func)(request, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CallResponse, Payload};
    use janus_core::{CallContext, CallKind, CallMeta, Protocol, Status};
    use parking_lot::Mutex;

    #[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
    struct Note {
        #[prost(string, tag = "1")]
        #[serde(default)]
        text: String,
    }

    impl janus_core::Message for Note {}

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Interceptor for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn intercept<'a>(&'a self, request: CallRequest, next: Next<'a>) -> BoxFuture<'a, CallResult> {
            Box::pin(async move {
                self.log.lock().push(self.name);
                next.run(request).await
            })
        }
    }

    fn request() -> CallRequest {
        let meta = Arc::new(CallMeta::server("demo.Notes", "Add", CallKind::Unary));
        CallRequest::new(
            CallContext::new(meta, Protocol::Grpc, http::HeaderMap::new()),
            Payload::Unary(Box::new(Note { text: "hi".into() })),
        )
    }

    fn echo_handler() -> CallHandler {
        Arc::new(|request: CallRequest| -> BoxFuture<'static, CallResult> {
            Box::pin(async move { Ok(CallResponse::new(request.payload)) })
        })
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<BoxedInterceptor> = vec![
            Arc::new(Recording { name: "first", log: Arc::clone(&log) }),
            Arc::new(Recording { name: "second", log: Arc::clone(&log) }),
        ];
        let handler = echo_handler();

        let next = Next::new(&chain, &handler);
        assert_eq!(next.remaining(), 2);
        let response = next.run(request()).await.unwrap();

        assert!(matches!(response.payload, Payload::Unary(_)));
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler() {
        let blocker = FnInterceptor::new("blocker", |_request, _next| {
            Box::pin(async { Err(Status::permission_denied("nope")) })
        });
        let chain: Vec<BoxedInterceptor> = vec![Arc::new(blocker)];
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);
        let handler: CallHandler = Arc::new(move |request: CallRequest| -> BoxFuture<'static, CallResult> {
            *flag.lock() = true;
            Box::pin(async move { Ok(CallResponse::new(request.payload)) })
        });

        let err = Next::new(&chain, &handler).run(request()).await.unwrap_err();
        assert_eq!(err.message(), "nope");
        assert!(!*called.lock());
    }
}
