//! HTTP to RPC bridge.
//!
//! Turns an HTTP request bound to a registered method into a call: the
//! metadata is filtered from the request headers, the body is decoded by
//! content type, the call runs through the same pipeline as native gRPC
//! calls, and the output is re-encoded for the caller.
//!
//! Streaming outputs are written as a JSON array, one message per body
//! frame; an error after the first message becomes the last element.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{future, stream, StreamExt};
use http::header::{CONTENT_TYPE, TE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use janus_core::{
    BoxMessage, BoxMessageStream, CallContext, CodeRegistry, ErrorBody, FieldNaming, Protocol,
    RequestId, ResponseMetadata, Status, REQUEST_ID_HEADER,
};
use janus_middleware::{Payload, Pipeline};
use serde_json::{Map, Value};

use crate::dispatch::{call_timeout, dispatch};
use crate::marshal::JsonMarshaler;
use crate::router::PathParams;
use crate::service::MethodEntry;

/// Response body type of the HTTP listener.
pub type HttpBody = UnsyncBoxBody<Bytes, Infallible>;

/// Response type of the HTTP listener.
pub type HttpResponse = http::Response<HttpBody>;

/// JSON media type.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Protobuf media type written in responses.
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Prefix of trailers sent as headers when the caller does not accept trailers.
pub const TRAILER_PREFIX: &str = "grpc-trailer-";

/// Request headers copied into call metadata besides `x-*`.
pub const ALLOWED_HEADERS: [&str; 25] = [
    "accept",
    "accept-charset",
    "accept-language",
    "accept-ranges",
    "authorization",
    "cache-control",
    "content-type",
    "cookie",
    "location",
    "date",
    "expect",
    "from",
    "host",
    "if-match",
    "if-modified-since",
    "if-none-match",
    "if-schedule-tag-match",
    "if-unmodified-since",
    "max-forwards",
    "origin",
    "pragma",
    "referer",
    "user-agent",
    "via",
    "warning",
];

const TRACING_HEADERS: [&str; 4] = ["traceparent", "tracestate", "b3", "uber-trace-id"];

/// A fixed body.
pub fn full(bytes: impl Into<Bytes>) -> HttpBody {
    Full::new(bytes.into()).boxed_unsync()
}

/// An empty body.
pub fn empty() -> HttpBody {
    full(Bytes::new())
}

/// Payload encoding on the HTTP side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// JSON through the configured marshaler.
    Json,
    /// Binary protobuf.
    Protobuf,
}

fn is_protobuf(media_type: &str) -> bool {
    let media_type = media_type.split(';').next().unwrap_or_default().trim();
    media_type.eq_ignore_ascii_case("application/x-protobuf")
        || media_type.eq_ignore_ascii_case("application/protobuf")
}

impl WireFormat {
    /// Request body format from `Content-Type`; JSON unless protobuf is named.
    pub fn of_request(headers: &HeaderMap) -> Self {
        match headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
            Some(value) if is_protobuf(value) => Self::Protobuf,
            _ => Self::Json,
        }
    }

    /// Response body format from `Accept`; JSON unless protobuf is asked for.
    pub fn of_response(headers: &HeaderMap) -> Self {
        let wants_protobuf = headers
            .get_all(http::header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(is_protobuf);
        if wants_protobuf {
            Self::Protobuf
        } else {
            Self::Json
        }
    }

    /// Media type written in `Content-Type`.
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Json => JSON_CONTENT_TYPE,
            Self::Protobuf => PROTOBUF_CONTENT_TYPE,
        }
    }
}

fn is_tracing_header(name: &str) -> bool {
    TRACING_HEADERS.contains(&name) || name.starts_with("x-b3-")
}

/// Call metadata from request headers: `x-*` plus the allow-list.
///
/// Tracing headers are kept only when `propagate_tracing` is on.
pub fn call_metadata(headers: &HeaderMap, propagate_tracing: bool) -> HeaderMap {
    let mut metadata = HeaderMap::new();
    for (name, value) in headers {
        let key = name.as_str();
        let keep = if is_tracing_header(key) {
            propagate_tracing
        } else {
            key.starts_with("x-") || ALLOWED_HEADERS.contains(&key)
        };
        if keep {
            metadata.append(name.clone(), value.clone());
        }
    }
    metadata
}

/// Whether the caller accepts HTTP trailers (`TE: trailers`).
pub fn accepts_trailers(headers: &HeaderMap) -> bool {
    headers
        .get_all(TE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case("trailers"))
}

/// Error body bytes and HTTP status for `status`.
///
/// A body that cannot be marshaled becomes the fixed internal-error body
/// with status 500.
pub fn error_body(status: &Status, codes: &CodeRegistry, naming: FieldNaming) -> (StatusCode, Bytes) {
    match status.to_error_body(codes).to_vec(naming) {
        Ok(body) => (status.code().http_status(), Bytes::from(body)),
        Err(e) => {
            tracing::error!(error = %e, "failed to marshal error body");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Bytes::from_static(ErrorBody::fallback(naming).as_bytes()),
            )
        }
    }
}

/// An error response for `status`.
pub fn error_response(status: &Status, codes: &CodeRegistry, naming: FieldNaming) -> HttpResponse {
    let (code, body) = error_body(status, codes, naming);
    let mut response = http::Response::new(full(body));
    *response.status_mut() = code;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}

fn parse_json(body: &[u8]) -> Result<Value, Status> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| Status::invalid_argument(format!("invalid JSON body: {e}")))
}

fn with_params(value: Value, params: &PathParams) -> Value {
    match value {
        Value::Object(mut object) if !params.is_empty() => {
            for (name, param) in params {
                object.insert(name.clone(), Value::String(param.clone()));
            }
            Value::Object(object)
        }
        Value::Null if !params.is_empty() => with_params(Value::Object(Map::new()), params),
        other => other,
    }
}

fn message_stream(messages: Vec<BoxMessage>) -> BoxMessageStream {
    Box::pin(stream::iter(messages.into_iter().map(Ok)))
}

/// Decodes a request body into the call payload of `entry`.
///
/// Path parameters are merged into JSON objects as strings. Streaming
/// inputs accept one JSON object or an array of them.
pub fn decode_payload(
    entry: &MethodEntry,
    format: WireFormat,
    body: &[u8],
    params: &PathParams,
) -> Result<Payload, Status> {
    let streaming = entry.desc.kind.is_client_streaming();
    match format {
        WireFormat::Protobuf => {
            let message = (entry.decode_protobuf)(body)?;
            if streaming {
                Ok(Payload::Stream(message_stream(vec![message])))
            } else {
                Ok(Payload::Unary(message))
            }
        }
        WireFormat::Json => {
            let value = parse_json(body)?;
            if streaming {
                let items = match value {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                let messages = items
                    .into_iter()
                    .map(|item| (entry.decode_json)(with_params(item, params)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Payload::Stream(message_stream(messages)))
            } else {
                Ok(Payload::Unary((entry.decode_json)(with_params(value, params))?))
            }
        }
    }
}

/// A bridged request, after routing.
#[derive(Debug)]
pub struct BridgeRequest {
    /// Request headers.
    pub headers: HeaderMap,
    /// Collected body.
    pub body: Bytes,
    /// Path parameters of the matched route.
    pub params: PathParams,
    /// Remote address.
    pub peer: Option<SocketAddr>,
}

/// Runs bridged calls.
#[derive(Debug, Clone)]
pub struct Bridge {
    pipeline: Pipeline,
    marshaler: JsonMarshaler,
    codes: Arc<CodeRegistry>,
    propagate_tracing: bool,
}

impl Bridge {
    /// Creates a bridge running calls through `pipeline`.
    pub fn new(pipeline: Pipeline, marshaler: JsonMarshaler, codes: Arc<CodeRegistry>, propagate_tracing: bool) -> Self {
        Self {
            pipeline,
            marshaler,
            codes,
            propagate_tracing,
        }
    }

    /// The marshaler used for outputs and error bodies.
    pub const fn marshaler(&self) -> JsonMarshaler {
        self.marshaler
    }

    /// The code registry used for error bodies.
    pub fn codes(&self) -> &CodeRegistry {
        &self.codes
    }

    /// An error response with this bridge's naming.
    pub fn error(&self, status: &Status) -> HttpResponse {
        error_response(status, &self.codes, self.marshaler.naming())
    }

    /// Calls `entry` with an HTTP request.
    pub async fn call(&self, entry: &MethodEntry, request: BridgeRequest) -> HttpResponse {
        let metadata = call_metadata(&request.headers, self.propagate_tracing);
        let timeout = call_timeout(&metadata);
        let ctx = CallContext::new(Arc::clone(&entry.meta), Protocol::Http, metadata)
            .with_peer(request.peer)
            .with_timeout(timeout);
        let response_metadata = ctx.response_metadata().clone();
        let request_id = ctx.request_id().clone();
        let send_trailers = accepts_trailers(&request.headers);

        let result = match decode_payload(entry, WireFormat::of_request(&request.headers), &request.body, &request.params) {
            Ok(payload) => dispatch(&self.pipeline, entry, ctx, payload).await,
            Err(status) => Err(status),
        };

        let mut response = match result {
            Ok(response) => match response.payload {
                Payload::Unary(message) => self.unary_response(
                    message.as_ref(),
                    WireFormat::of_response(&request.headers),
                    &response_metadata,
                    send_trailers,
                ),
                Payload::Stream(stream) => self.stream_response(stream, response_metadata.clone(), send_trailers),
            },
            Err(status) => {
                let mut response = self.error(&status);
                append_trailers_as_headers(response.headers_mut(), &response_metadata.trailers());
                response
            }
        };

        let headers = response.headers_mut();
        for (name, value) in &response_metadata.headers() {
            headers.append(name.clone(), value.clone());
        }
        set_request_id(headers, &request_id);
        response
    }

    fn unary_response(
        &self,
        message: &dyn janus_core::DynMessage,
        format: WireFormat,
        response_metadata: &ResponseMetadata,
        send_trailers: bool,
    ) -> HttpResponse {
        let encoded = match format {
            WireFormat::Json => self.marshaler.marshal(message),
            WireFormat::Protobuf => Ok(message.encode_protobuf()),
        };
        let body = match encoded {
            Ok(body) => Bytes::from(body),
            Err(status) => return self.error(&status),
        };

        let trailers = response_metadata.trailers();
        let mut response = if send_trailers && !trailers.is_empty() {
            let frames: [Result<Frame<Bytes>, Infallible>; 2] = [Ok(Frame::data(body)), Ok(Frame::trailers(trailers))];
            http::Response::new(StreamBody::new(stream::iter(frames)).boxed_unsync())
        } else {
            let mut response = http::Response::new(full(body));
            append_trailers_as_headers(response.headers_mut(), &trailers);
            response
        };
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
        response
    }

    fn stream_response(&self, messages: BoxMessageStream, response_metadata: ResponseMetadata, send_trailers: bool) -> HttpResponse {
        let marshaler = self.marshaler;
        let codes = Arc::clone(&self.codes);

        let elements = messages.enumerate().map(move |(i, item)| {
            let mut chunk = Vec::new();
            if i > 0 {
                chunk.push(b',');
            }
            match item.and_then(|message| marshaler.marshal(message.as_ref())) {
                Ok(json) => chunk.extend(json),
                Err(status) => chunk.extend_from_slice(&error_body(&status, &codes, marshaler.naming()).1),
            }
            Bytes::from(chunk)
        });
        let data = stream::once(future::ready(Bytes::from_static(b"[")))
            .chain(elements)
            .chain(stream::once(future::ready(Bytes::from_static(b"]"))))
            .map(|chunk| Ok::<_, Infallible>(Frame::data(chunk)));
        let trailers = stream::once(async move { Ok::<_, Infallible>(Frame::trailers(response_metadata.trailers())) })
            .filter(move |_| future::ready(send_trailers));

        let mut response = http::Response::new(StreamBody::new(data.chain(trailers)).boxed_unsync());
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        response
    }
}

fn append_trailers_as_headers(headers: &mut HeaderMap, trailers: &HeaderMap) {
    for (name, value) in trailers {
        if let Ok(name) = HeaderName::from_bytes(format!("{TRAILER_PREFIX}{name}").as_bytes()) {
            headers.append(name, value.clone());
        }
    }
}

/// Echoes the request id on a response.
pub fn set_request_id(headers: &mut HeaderMap, request_id: &RequestId) {
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
}
