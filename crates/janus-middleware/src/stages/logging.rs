//! Structured call logging stage.
//!
//! Opens one span per call and runs the rest of the chain inside it, so
//! every log statement a handler writes carries the call's fields:
//!
//! | Field        | Value                                        |
//! |--------------|----------------------------------------------|
//! | `action`     | full method path, `/pkg.Service/Method`      |
//! | `protocol`   | `grpc/server/unary`, `http/server/bidi_stream`, ... |
//! | `peer`       | remote address                               |
//! | `deadline`   | absolute deadline (RFC 3339), if any         |
//! | `request_id` | forwarded or generated request id            |
//! | meta tags    | `client_id`, `user_id`, `device_id`, ...     |
//!
//! When the call completes the stage writes one "finished call" record with
//! `duration` (ms), `code` and `error`, plus request and response bodies
//! when the call's [`Decision`] asks for them. A call dropped before it
//! completes (the caller went away) logs "call cancelled" instead.
//!
//! The record's level follows the status code: client-side outcomes are
//! `INFO`, server trouble that may clear up is `WARN`, and `Unknown` /
//! `Internal` are `ERROR`. See [`level_for`].

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use janus_core::{CallContext, CallMeta, Code, Status};
use tracing::field::Empty;
use tracing::{Instrument, Level, Span};

use crate::call::{CallRequest, CallResponse, CallResult, Payload};
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::observe::{ObservedStream, StreamEnd};
use crate::stages::body::BodyEncoder;
use crate::HEALTH_SERVICE;

/// Meta tags copied into the call span by default.
pub const DEFAULT_META_TAGS: [&str; 4] = ["client_id", "user_id", "device_id", "request_id"];

// tags with a dedicated span field; anything else goes into `tags`
const SPAN_TAG_FIELDS: [&str; 6] = [
    "client_id",
    "user_id",
    "device_id",
    "project_id",
    "organization_id",
    "request_id",
];

/// Per-call logging policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decision {
    /// Log the call at all.
    pub enable: bool,
    /// Log a "started call" record as well.
    pub start: bool,
    /// Include the request body.
    pub request: bool,
    /// Include the response body.
    pub response: bool,
    /// Remove byte-valued and elided fields from logged bodies.
    pub clear_data: bool,
}

/// Computes the [`Decision`] for a call.
pub trait Decider: Send + Sync + 'static {
    /// Decides how to log the call.
    fn decide(&self, meta: &CallMeta) -> Decision;
}

impl<F> Decider for F
where
    F: Fn(&CallMeta) -> Decision + Send + Sync + 'static,
{
    fn decide(&self, meta: &CallMeta) -> Decision {
        self(meta)
    }
}

/// Logs every call except health checks, without bodies.
pub fn default_decider(meta: &CallMeta) -> Decision {
    if meta.service() == HEALTH_SERVICE {
        return Decision::default();
    }
    Decision {
        enable: true,
        ..Decision::default()
    }
}

/// Logs every call except health checks, with bodies; streams also log their start.
pub fn body_decider(meta: &CallMeta) -> Decision {
    if meta.service() == HEALTH_SERVICE {
        return Decision::default();
    }
    Decision {
        enable: true,
        start: meta.kind().is_client_streaming() || meta.kind().is_server_streaming(),
        request: true,
        response: true,
        clear_data: false,
    }
}

/// Level of the "finished call" record for a status code.
pub fn level_for(code: Code) -> Level {
    match code {
        Code::OK
        | Code::CANCELLED
        | Code::INVALID_ARGUMENT
        | Code::NOT_FOUND
        | Code::ALREADY_EXISTS
        | Code::RESOURCE_EXHAUSTED
        | Code::FAILED_PRECONDITION
        | Code::ABORTED
        | Code::OUT_OF_RANGE
        | Code::PERMISSION_DENIED
        | Code::UNAUTHENTICATED => Level::INFO,
        Code::DEADLINE_EXCEEDED | Code::UNAVAILABLE | Code::DATA_LOSS | Code::UNIMPLEMENTED => {
            Level::WARN
        }
        Code::UNKNOWN | Code::INTERNAL => Level::ERROR,
        other if other.leading_digit() == 2 => Level::INFO,
        _ => Level::WARN,
    }
}

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        if $level == Level::ERROR {
            tracing::error!($($arg)+)
        } else if $level == Level::WARN {
            tracing::warn!($($arg)+)
        } else {
            tracing::info!($($arg)+)
        }
    };
}

/// Options for the logging stage.
#[derive(Clone)]
pub struct LoggingOptions {
    decider: Arc<dyn Decider>,
    encoder: BodyEncoder,
    meta_tags: Vec<String>,
}

impl std::fmt::Debug for LoggingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingOptions")
            .field("encoder", &self.encoder)
            .field("meta_tags", &self.meta_tags)
            .finish_non_exhaustive()
    }
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            decider: Arc::new(default_decider),
            encoder: BodyEncoder::new(),
            meta_tags: DEFAULT_META_TAGS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl LoggingOptions {
    /// Default options: log every call, no bodies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Body logging preset: [`body_decider`] and `password` masked.
    pub fn with_bodies() -> Self {
        Self::default()
            .decider(body_decider)
            .mask_fields(["password"])
    }

    /// Replaces the decider.
    #[must_use]
    pub fn decider<D: Decider>(mut self, decider: D) -> Self {
        self.decider = Arc::new(decider);
        self
    }

    /// Adds masked fields.
    #[must_use]
    pub fn mask_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.encoder = self.encoder.mask_fields(fields);
        self
    }

    /// Adds elided fields.
    #[must_use]
    pub fn elide_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.encoder = self.encoder.elide_fields(fields);
        self
    }

    /// Replaces the meta tags copied into the call span.
    #[must_use]
    pub fn meta_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta_tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// `grpc/server/unary`-style protocol label.
fn protocol_label(ctx: &CallContext) -> String {
    let side = if ctx.meta().is_client() { "client" } else { "server" };
    format!("{}/{}/{}", ctx.protocol().as_str(), side, ctx.meta().kind())
}

/// Looks up a meta tag: authenticated identity first, then `x-` metadata, then plain metadata.
fn tag_value(ctx: &CallContext, tag: &str) -> Option<String> {
    if tag == "request_id" {
        return Some(ctx.request_id().to_string());
    }
    if let Some(value) = ctx.auth().and_then(|auth| auth.tag(tag)) {
        return Some(value.to_string());
    }
    let header = format!("x-{}", tag.replace('_', "-"));
    ctx.metadata_value(&header)
        .or_else(|| ctx.metadata_value(tag))
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn code_name(code: Code) -> String {
    code.canonical_name()
        .map_or_else(|| code.value().to_string(), str::to_string)
}

/// Logging interceptor.
#[derive(Debug, Clone, Default)]
pub struct LoggingInterceptor {
    options: Arc<LoggingOptions>,
}

impl LoggingInterceptor {
    /// Creates the stage.
    pub fn new(options: LoggingOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    fn call_span(&self, ctx: &CallContext) -> Span {
        let span = tracing::info_span!(
            "call",
            action = %ctx.meta().full_method(),
            protocol = %protocol_label(ctx),
            peer = Empty,
            deadline = Empty,
            request_id = %ctx.request_id(),
            client_id = Empty,
            user_id = Empty,
            device_id = Empty,
            project_id = Empty,
            organization_id = Empty,
            tags = Empty,
            stack = Empty,
        );
        if let Some(peer) = ctx.peer() {
            span.record("peer", tracing::field::display(peer));
        }
        if let Some(remaining) = ctx.remaining() {
            if let Ok(delta) = chrono::TimeDelta::from_std(remaining) {
                span.record("deadline", (chrono::Utc::now() + delta).to_rfc3339());
            }
        }

        let mut extra = String::new();
        for tag in &self.options.meta_tags {
            let Some(value) = tag_value(ctx, tag) else {
                continue;
            };
            if SPAN_TAG_FIELDS.contains(&tag.as_str()) {
                span.record(tag.as_str(), value.as_str());
            } else {
                if !extra.is_empty() {
                    extra.push(',');
                }
                let _ = write!(extra, "{tag}={value}");
            }
        }
        if !extra.is_empty() {
            span.record("tags", extra.as_str());
        }
        span
    }
}

/// Logs "call cancelled" if dropped while armed.
struct CancelGuard {
    span: Span,
    started: Instant,
    armed: bool,
}

impl CancelGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            let _entered = self.span.enter();
            log_cancelled(self.started);
        }
    }
}

fn log_cancelled(started: Instant) {
    tracing::info!(
        duration = started.elapsed().as_secs_f64() * 1000.0,
        code = %code_name(Code::CANCELLED),
        "call cancelled"
    );
}

fn log_finished(
    started: Instant,
    status: Option<&Status>,
    request: Option<&str>,
    response: Option<&str>,
) {
    let code = status.map_or(Code::OK, Status::code);
    let level = level_for(code);
    let duration = started.elapsed().as_secs_f64() * 1000.0;
    let error = status.map(Status::message);
    log_at!(
        level,
        duration,
        code = %code_name(code),
        error,
        request,
        response,
        "finished call"
    );
}

impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn intercept<'a>(&'a self, mut request: CallRequest, next: Next<'a>) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            let decision = self.options.decider.decide(request.ctx.meta());
            let span = self.call_span(&request.ctx);
            if !decision.enable {
                return next.run(request).instrument(span).await;
            }

            let started = Instant::now();
            if decision.start {
                span.in_scope(|| tracing::info!("started call"));
            }

            let encoder = &self.options.encoder;
            let request_body = match &mut request.payload {
                Payload::Unary(message) if decision.request => {
                    Some(encoder.encode(message.as_ref(), decision.clear_data))
                }
                Payload::Stream(stream) if decision.request => {
                    let inner = std::mem::replace(stream, Box::pin(futures_util::stream::empty()));
                    let item_encoder = encoder.clone();
                    *stream = ObservedStream::new(inner)
                        .on_item(move |message| {
                            tracing::info!(
                                request = %item_encoder.encode(message.as_ref(), decision.clear_data),
                                "received message"
                            );
                            Ok(())
                        })
                        .in_span(span.clone())
                        .boxed();
                    None
                }
                _ => None,
            };

            let guard = CancelGuard {
                span: span.clone(),
                started,
                armed: true,
            };
            let result = next.run(request).instrument(span.clone()).await;
            guard.disarm();

            match result {
                Ok(CallResponse {
                    payload: Payload::Unary(message),
                }) => {
                    let response_body = decision
                        .response
                        .then(|| encoder.encode(message.as_ref(), decision.clear_data));
                    span.in_scope(|| {
                        log_finished(started, None, request_body.as_deref(), response_body.as_deref());
                    });
                    Ok(CallResponse::unary(message))
                }
                Ok(CallResponse {
                    payload: Payload::Stream(stream),
                }) => {
                    let item_encoder = encoder.clone();
                    let mut observed = ObservedStream::new(stream);
                    if decision.response {
                        observed = observed.on_item(move |message| {
                            tracing::info!(
                                response = %item_encoder.encode(message.as_ref(), decision.clear_data),
                                "sent message"
                            );
                            Ok(())
                        });
                    }
                    let stream = observed
                        .on_end(move |end, _| match end {
                            StreamEnd::Completed => {
                                log_finished(started, None, request_body.as_deref(), None);
                            }
                            StreamEnd::Failed(status) => {
                                log_finished(started, Some(&status), request_body.as_deref(), None);
                            }
                            StreamEnd::Dropped => log_cancelled(started),
                        })
                        .in_span(span)
                        .boxed();
                    Ok(CallResponse::stream(stream))
                }
                Err(status) => {
                    span.in_scope(|| log_finished(started, Some(&status), request_body.as_deref(), None));
                    Err(status)
                }
            }
        })
    }
}
