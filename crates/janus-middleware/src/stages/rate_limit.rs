//! Rate limiting stage.
//!
//! Resolves each call against a [`RouterLimit`] rule set and takes a token
//! from a [`TokenStore`] for quota-checked calls. Blocked calls fail with
//! `Aborted` without consuming anything; exhausted quotas fail with
//! `ResourceExhausted` and a retry hint.
//!
//! HTTP calls carry the limit state back to the caller:
//!
//! - `X-RateLimit-Limit`: calls allowed per window
//! - `X-RateLimit-Remaining`: calls left in the current window
//! - `X-RateLimit-Reset`: seconds until the window resets
//! - `X-RateLimit-Resource`: the limit key, flattened
//!
//! When the configured store fails, the stage falls back to an in-process
//! fixed-window store rather than failing the call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use http::{HeaderName, HeaderValue};

use janus_core::duration::format_duration;
use janus_core::{CallContext, Protocol, Status};

use crate::call::{CallRequest, CallResult};
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::limit::{LimitOutcome, RouterLimit};

/// Rate limit header names.
pub mod headers {
    /// Calls allowed per window.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Calls left in the current window.
    pub const REMAINING: &str = "x-ratelimit-remaining";
    /// Seconds until the window resets.
    pub const RESET: &str = "x-ratelimit-reset";
    /// Flattened limit key.
    pub const RESOURCE: &str = "x-ratelimit-resource";
}

/// Result of taking tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TakeResult {
    /// Tokens left in the window.
    pub remaining: u64,
    /// Time until the window resets.
    pub reset: Duration,
    /// Whether the tokens were granted.
    pub allowed: bool,
}

/// Token store failures.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    /// The backing store could not be reached.
    #[error("token store unavailable: {0}")]
    Unavailable(String),

    /// The backing store answered with something unusable.
    #[error("token store error: {0}")]
    Backend(String),
}

/// Fixed-window token storage.
pub trait TokenStore: Send + Sync + 'static {
    /// Takes `n` tokens for `key` from a window of `quota` tokens.
    fn take<'a>(
        &'a self,
        key: &'a str,
        quota: u64,
        window: Duration,
        n: u64,
    ) -> BoxFuture<'a, Result<TakeResult, LimiterError>>;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: Instant,
}

// sweep expired windows once the map grows past this
const SWEEP_THRESHOLD: usize = 64 * 1024;

/// In-process fixed-window store.
#[derive(Debug, Default)]
pub struct LocalTokenStore {
    windows: DashMap<String, Window>,
}

impl LocalTokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes tokens synchronously.
    pub fn take_now(&self, key: &str, quota: u64, window: Duration, n: u64) -> TakeResult {
        let now = Instant::now();
        if self.windows.len() > SWEEP_THRESHOLD {
            self.windows.retain(|_, w| w.expires_at > now);
        }

        let slot = format!("{key}.{}", window.as_millis());
        let mut entry = self.windows.entry(slot).or_insert(Window {
            count: 0,
            expires_at: now,
        });
        let current = entry.value_mut();

        if current.expires_at <= now {
            *current = Window {
                count: n,
                expires_at: now + window,
            };
            return TakeResult {
                remaining: quota.saturating_sub(n),
                reset: window,
                allowed: n <= quota,
            };
        }

        let reset = current.expires_at - now;
        let wanted = current.count + n;
        let allowed = wanted <= quota;
        if allowed {
            current.count = wanted;
        }
        TakeResult {
            remaining: quota.saturating_sub(wanted),
            reset,
            allowed,
        }
    }

    /// Number of tracked windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// True if no windows are tracked.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl TokenStore for LocalTokenStore {
    fn take<'a>(
        &'a self,
        key: &'a str,
        quota: u64,
        window: Duration,
        n: u64,
    ) -> BoxFuture<'a, Result<TakeResult, LimiterError>> {
        Box::pin(async move { Ok(self.take_now(key, quota, window, n)) })
    }
}

/// Rate limiting interceptor.
pub struct RateLimitInterceptor {
    rules: Arc<RouterLimit>,
    store: Option<Arc<dyn TokenStore>>,
    local: LocalTokenStore,
}

impl std::fmt::Debug for RateLimitInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitInterceptor")
            .field("rules", &self.rules)
            .field("external_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl RateLimitInterceptor {
    /// Limits calls with the in-process store.
    pub fn new(rules: RouterLimit) -> Self {
        Self {
            rules: Arc::new(rules),
            store: None,
            local: LocalTokenStore::new(),
        }
    }

    /// Uses `store` for tokens, with the in-process store as fallback.
    pub fn with_store<S: TokenStore>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    async fn take(&self, key: &str, quota: u64, window: Duration) -> TakeResult {
        if let Some(store) = &self.store {
            match store.take(key, quota, window, 1).await {
                Ok(result) => return result,
                Err(err) => {
                    tracing::warn!(error = %err, key, "token store failed, using local limiter");
                }
            }
        }
        self.local.take_now(key, quota, window, 1)
    }
}

/// Limit key with `/`, `.` and `-` removed.
pub fn resource_key(key: &str) -> String {
    key.chars().filter(|c| !matches!(c, '/' | '.' | '-')).collect()
}

fn set_limit_headers(ctx: &CallContext, quota: u64, key: &str, result: &TakeResult) {
    let set = |name: &'static str, value: HeaderValue| {
        ctx.set_header(HeaderName::from_static(name), value);
    };
    set(headers::LIMIT, HeaderValue::from(quota));
    set(headers::REMAINING, HeaderValue::from(result.remaining));
    set(headers::RESET, HeaderValue::from(result.reset.as_secs()));
    if let Ok(resource) = HeaderValue::from_str(&resource_key(key)) {
        set(headers::RESOURCE, resource);
    }
}

impl Interceptor for RateLimitInterceptor {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn intercept<'a>(&'a self, request: CallRequest, next: Next<'a>) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            let method = request.ctx.meta().full_method();
            match self.rules.resolve(&method, request.ctx.metadata()) {
                LimitOutcome::Unlimited => {}
                LimitOutcome::Blocked { message } => {
                    return Err(Status::aborted(format!("{method} is aborted for {message}")));
                }
                LimitOutcome::Quota {
                    key,
                    quota,
                    window,
                    message,
                } => {
                    let result = self.take(&key, quota, window).await;
                    if request.ctx.protocol() == Protocol::Http {
                        set_limit_headers(&request.ctx, quota, &key, &result);
                    }
                    if !result.allowed {
                        let retry = format_duration(result.reset);
                        return Err(Status::resource_exhausted(format!(
                            "method is rejected for {message}, please try in {retry}."
                        ))
                        .with_detail(serde_json::json!({
                            "@type": "type.googleapis.com/google.rpc.RetryInfo",
                            "retry_after": retry,
                        })));
                    }
                }
            }
            next.run(request).await
        })
    }
}
