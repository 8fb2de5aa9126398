//! Authentication stage.
//!
//! Calls the configured [`Authenticator`] and stores the resulting
//! [`AuthInfo`] in the call context, where later stages (authorization,
//! logging, rate limiting) and the handler read it.
//!
//! ## Skipped calls
//!
//! - the gRPC health service, which must stay reachable for health checkers
//! - any method whose full path starts with a configured skip prefix

use janus_core::{AuthInfo, CallContext, Status};

use crate::call::{CallRequest, CallResult};
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::HEALTH_SERVICE;

/// Header carrying credentials.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Establishes the caller's identity.
pub trait Authenticator: Send + Sync + 'static {
    /// Returns the caller identity, or a status (usually `Unauthenticated`) to reject the call.
    fn authenticate<'a>(&'a self, ctx: &'a CallContext) -> BoxFuture<'a, Result<AuthInfo, Status>>;
}

impl<F> Authenticator for F
where
    F: Fn(&CallContext) -> Result<AuthInfo, Status> + Send + Sync + 'static,
{
    fn authenticate<'a>(&'a self, ctx: &'a CallContext) -> BoxFuture<'a, Result<AuthInfo, Status>> {
        let result = self(ctx);
        Box::pin(std::future::ready(result))
    }
}

/// Extracts a bearer token from the `authorization` metadata.
pub fn bearer_token(ctx: &CallContext) -> Option<&str> {
    let value = ctx.metadata_value(AUTHORIZATION_HEADER)?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then_some(token.trim())
        .filter(|t| !t.is_empty())
}

/// Authentication interceptor.
pub struct AuthInterceptor {
    authenticator: Box<dyn Authenticator>,
    skip_prefixes: Vec<String>,
}

impl std::fmt::Debug for AuthInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInterceptor")
            .field("skip_prefixes", &self.skip_prefixes)
            .finish_non_exhaustive()
    }
}

impl AuthInterceptor {
    /// Creates the stage around an authenticator.
    pub fn new<A: Authenticator>(authenticator: A) -> Self {
        Self {
            authenticator: Box::new(authenticator),
            skip_prefixes: Vec::new(),
        }
    }

    /// Method path prefixes that bypass authentication.
    #[must_use]
    pub fn skip_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.skip_prefixes = prefixes;
        self
    }

    fn skips(&self, ctx: &CallContext) -> bool {
        if ctx.meta().service() == HEALTH_SERVICE {
            return true;
        }
        let path = ctx.meta().full_method();
        self.skip_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

impl Interceptor for AuthInterceptor {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn intercept<'a>(&'a self, mut request: CallRequest, next: Next<'a>) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            if !self.skips(&request.ctx) {
                let auth = self.authenticator.authenticate(&request.ctx).await?;
                tracing::debug!(
                    auth_type = %auth.auth_type,
                    principal = %auth.principal(),
                    "caller authenticated"
                );
                request.ctx.set_auth(auth);
            }
            next.run(request).await
        })
    }
}
