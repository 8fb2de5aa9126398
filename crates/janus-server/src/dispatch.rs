//! Running one call through the pipeline, for either front end.
//!
//! Both listeners end up here: the call gets its deadline enforced, its
//! cancellation token tied to the lifetime of the call (and of its response
//! stream), and counts as in flight until it is done.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::Stream;
use http::HeaderMap;
use janus_core::duration::parse_duration;
use janus_core::{BoxMessage, BoxMessageStream, CallContext, Status};
use janus_middleware::{CallRequest, CallResponse, CallResult, Payload, Pipeline};
use janus_telemetry::InFlightGuard;
use tokio::time::Sleep;
use tokio_util::sync::DropGuard;

use crate::service::MethodEntry;

/// gRPC deadline header.
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Deadline header for JSON/HTTP callers.
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout";

const DEADLINE_MESSAGE: &str = "deadline exceeded";

/// Parses a `grpc-timeout` value: at most eight digits and a unit.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}

/// Call timeout from `grpc-timeout`, or from `x-request-timeout`.
pub fn call_timeout(metadata: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| metadata.get(name).and_then(|v| v.to_str().ok());
    header(GRPC_TIMEOUT_HEADER)
        .and_then(parse_grpc_timeout)
        .or_else(|| header(REQUEST_TIMEOUT_HEADER).and_then(|v| parse_duration(v).ok()))
}

/// Runs `payload` through `pipeline` to the method's handler.
///
/// The call's token is cancelled when the call finishes, is dropped, or
/// runs past its deadline; for streaming responses, when the response
/// stream ends or is dropped.
pub async fn dispatch(pipeline: &Pipeline, entry: &MethodEntry, ctx: CallContext, payload: Payload) -> CallResult {
    let in_flight = InFlightGuard::new();
    let deadline = ctx.deadline();
    let guard = ctx.cancellation().clone().drop_guard();

    let call = pipeline.call(CallRequest::new(ctx, payload), &entry.handler);
    let response = match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline.into(), call)
            .await
            .unwrap_or_else(|_| Err(Status::deadline_exceeded(DEADLINE_MESSAGE)))?,
        None => call.await?,
    };

    match response.payload {
        Payload::Stream(stream) => Ok(CallResponse::stream(Box::pin(CallStream::new(
            stream, deadline, guard, in_flight,
        )))),
        payload => Ok(CallResponse::new(payload)),
    }
}

/// A response stream bound to its call: ends with `DeadlineExceeded` once
/// the deadline passes, and cancels the call when dropped.
struct CallStream {
    inner: BoxMessageStream,
    deadline: Option<Pin<Box<Sleep>>>,
    done: bool,
    _guard: DropGuard,
    _in_flight: InFlightGuard,
}

impl CallStream {
    fn new(inner: BoxMessageStream, deadline: Option<Instant>, guard: DropGuard, in_flight: InFlightGuard) -> Self {
        Self {
            inner,
            deadline: deadline.map(|at| Box::pin(tokio::time::sleep_until(at.into()))),
            done: false,
            _guard: guard,
            _in_flight: in_flight,
        }
    }
}

impl Stream for CallStream {
    type Item = Result<BoxMessage, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        if let Poll::Ready(item) = self.inner.as_mut().poll_next(cx) {
            if !matches!(item, Some(Ok(_))) {
                self.done = true;
            }
            return Poll::Ready(item);
        }
        if let Some(sleep) = self.deadline.as_mut() {
            if sleep.as_mut().poll(cx).is_ready() {
                self.done = true;
                return Poll::Ready(Some(Err(Status::deadline_exceeded(DEADLINE_MESSAGE))));
            }
        }
        Poll::Pending
    }
}
