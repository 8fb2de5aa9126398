//! Call metrics stage.
//!
//! Emits, through the `metrics` facade, the server-side call metrics every
//! gateway exposes:
//!
//! - `grpc_server_started_total` - calls started
//! - `grpc_server_handled_total` - calls finished, by `grpc_code`
//! - `grpc_server_msg_received_total` - input messages
//! - `grpc_server_msg_sent_total` - output messages
//! - `grpc_server_handling_seconds` - latency histogram
//!
//! Labels are `grpc_type`, `grpc_service`, `grpc_method` (and `grpc_code`
//! on the handled counter and histogram). For streaming responses the
//! call is counted as handled when the stream ends.

use std::sync::Arc;
use std::time::Instant;

use janus_core::{CallMeta, Code};

use crate::call::{CallRequest, CallResponse, CallResult, Payload};
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::observe::{ObservedStream, StreamEnd};

/// Metric names.
pub mod names {
    /// Calls started.
    pub const STARTED: &str = "grpc_server_started_total";
    /// Calls finished.
    pub const HANDLED: &str = "grpc_server_handled_total";
    /// Messages received.
    pub const MSG_RECEIVED: &str = "grpc_server_msg_received_total";
    /// Messages sent.
    pub const MSG_SENT: &str = "grpc_server_msg_sent_total";
    /// Handling latency.
    pub const HANDLING_SECONDS: &str = "grpc_server_handling_seconds";
    /// Recovered panics.
    pub const PANICS_RECOVERED: &str = "grpc_req_panics_recovered_total";
}

/// Latency histogram buckets, in seconds.
pub const HANDLING_BUCKETS: [f64; 14] = [
    0.001, 0.01, 0.1, 0.3, 0.6, 1.0, 3.0, 6.0, 9.0, 20.0, 30.0, 60.0, 90.0, 120.0,
];

#[derive(Debug, Clone)]
struct Labels {
    kind: &'static str,
    service: String,
    method: String,
}

impl Labels {
    fn of(meta: &CallMeta) -> Self {
        Self {
            kind: meta.kind().as_str(),
            service: meta.service().to_string(),
            method: meta.method().to_string(),
        }
    }

    fn base(&self) -> [(&'static str, String); 3] {
        [
            ("grpc_type", self.kind.to_string()),
            ("grpc_service", self.service.clone()),
            ("grpc_method", self.method.clone()),
        ]
    }

    fn started(&self) {
        metrics::counter!(names::STARTED, &self.base()).increment(1);
    }

    fn received(&self, n: u64) {
        metrics::counter!(names::MSG_RECEIVED, &self.base()).increment(n);
    }

    fn sent(&self, n: u64) {
        metrics::counter!(names::MSG_SENT, &self.base()).increment(n);
    }

    fn handled(&self, code: Code, started: Instant) {
        let [kind, service, method] = self.base();
        let labels = [kind, service, method, ("grpc_code", code_label(code))];
        metrics::counter!(names::HANDLED, &labels).increment(1);
        metrics::histogram!(names::HANDLING_SECONDS, &labels).record(started.elapsed().as_secs_f64());
    }
}

fn code_label(code: Code) -> String {
    code.canonical_name()
        .map_or_else(|| code.value().to_string(), str::to_string)
}

/// Metrics interceptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsInterceptor;

impl MetricsInterceptor {
    /// Creates the metrics stage.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Interceptor for MetricsInterceptor {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn intercept<'a>(&'a self, mut request: CallRequest, next: Next<'a>) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            let started = Instant::now();
            let labels = Arc::new(Labels::of(request.ctx.meta()));
            labels.started();

            request.payload = match request.payload {
                Payload::Unary(message) => {
                    labels.received(1);
                    Payload::Unary(message)
                }
                Payload::Stream(stream) => {
                    let counter = Arc::clone(&labels);
                    Payload::Stream(
                        ObservedStream::new(stream)
                            .on_item(move |_| {
                                counter.received(1);
                                Ok(())
                            })
                            .boxed(),
                    )
                }
            };

            match next.run(request).await {
                Ok(CallResponse {
                    payload: Payload::Unary(message),
                }) => {
                    labels.sent(1);
                    labels.handled(Code::OK, started);
                    Ok(CallResponse::unary(message))
                }
                Ok(CallResponse {
                    payload: Payload::Stream(stream),
                }) => {
                    let per_item = Arc::clone(&labels);
                    let stream = ObservedStream::new(stream)
                        .on_item(move |_| {
                            per_item.sent(1);
                            Ok(())
                        })
                        .on_end(move |end, _| {
                            let code = match end {
                                StreamEnd::Completed => Code::OK,
                                StreamEnd::Failed(status) => status.code(),
                                StreamEnd::Dropped => Code::CANCELLED,
                            };
                            labels.handled(code, started);
                        })
                        .boxed();
                    Ok(CallResponse::stream(stream))
                }
                Err(status) => {
                    labels.handled(status.code(), started);
                    Err(status)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{BoxedInterceptor, CallHandler};
    use janus_core::{CallContext, CallKind, Protocol, Status};
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
    struct Ping {}

    impl janus_core::Message for Ping {}

    #[test]
    fn test_code_label() {
        assert_eq!(code_label(Code::OK), "ok");
        assert_eq!(code_label(Code::new(4404)), "4404");
    }

    #[test]
    fn test_counts_started_and_handled() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let chain: Vec<BoxedInterceptor> = vec![Arc::new(MetricsInterceptor::new())];
                let handler: CallHandler =
                    Arc::new(|_request: CallRequest| -> BoxFuture<'static, CallResult> {
                        Box::pin(async { Err(Status::not_found("gone")) })
                    });
                let meta = Arc::new(CallMeta::server("demo.Ping", "Ping", CallKind::Unary));
                let request = CallRequest::new(
                    CallContext::new(meta, Protocol::Grpc, http::HeaderMap::new()),
                    Payload::Unary(Box::new(Ping {})),
                );
                let _ = Next::new(&chain, &handler).run(request).await;
            });
        });

        let rendered = handle.render();
        assert!(rendered.contains(names::STARTED));
        assert!(rendered.contains(names::MSG_RECEIVED));
        assert!(rendered.contains("grpc_code=\"not_found\""));
        assert!(!rendered.contains(names::MSG_SENT));
    }
}
