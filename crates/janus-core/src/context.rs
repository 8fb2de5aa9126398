//! Per-call context types.
//!
//! A [`CallContext`] is created fresh for every call by whichever protocol
//! front end received it, flows through the interceptor pipeline, and is
//! handed to the business handler. Both protocols fill it identically, so
//! interceptors and handlers never need to know where a call came from.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Header carrying the request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A request identifier.
///
/// Taken verbatim from the `x-request-id` header when present; otherwise a
/// UUID v7 is generated, which is time-ordered and sorts well in logs.
///
/// # Example
///
/// ```
/// use janus_core::RequestId;
///
/// let generated = RequestId::new();
/// assert_eq!(generated.as_str().len(), 36);
///
/// let forwarded = RequestId::from_header("req-42");
/// assert_eq!(forwarded.as_str(), "req-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Arc<str>);

impl RequestId {
    /// Creates a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string().into())
    }

    /// Wraps an identifier received from a caller.
    #[must_use]
    pub fn from_header(value: &str) -> Self {
        Self(value.into())
    }

    /// Uses the `x-request-id` header if present and non-empty, else generates one.
    #[must_use]
    pub fn from_metadata(metadata: &HeaderMap) -> Self {
        metadata
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map_or_else(Self::new, Self::from_header)
    }

    /// Returns the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string().into())
    }
}

/// Shape of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// Single request, single response.
    Unary,
    /// Many requests, single response.
    ClientStream,
    /// Single request, many responses.
    ServerStream,
    /// Many requests, many responses.
    BidiStream,
}

impl CallKind {
    /// Label used in metrics and log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unary => "unary",
            Self::ClientStream => "client_stream",
            Self::ServerStream => "server_stream",
            Self::BidiStream => "bidi_stream",
        }
    }

    /// Whether the caller sends more than one message.
    pub const fn is_client_streaming(self) -> bool {
        matches!(self, Self::ClientStream | Self::BidiStream)
    }

    /// Whether the handler sends more than one message.
    pub const fn is_server_streaming(self) -> bool {
        matches!(self, Self::ServerStream | Self::BidiStream)
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable descriptor of one call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallMeta {
    service: String,
    method: String,
    kind: CallKind,
    is_client: bool,
}

impl CallMeta {
    /// Describes a call received by this server.
    pub fn server(service: impl Into<String>, method: impl Into<String>, kind: CallKind) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            kind,
            is_client: false,
        }
    }

    /// Describes a call issued by this process.
    pub fn client(service: impl Into<String>, method: impl Into<String>, kind: CallKind) -> Self {
        Self {
            is_client: true,
            ..Self::server(service, method, kind)
        }
    }

    /// Fully-qualified service name, e.g. `pkg.Greeter`.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Method name, e.g. `SayHello`.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Call shape.
    pub const fn kind(&self) -> CallKind {
        self.kind
    }

    /// `true` on the calling side.
    pub const fn is_client(&self) -> bool {
        self.is_client
    }

    /// `/pkg.Service/Method`.
    pub fn full_method(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

/// The wire protocol a call arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Native binary RPC.
    Grpc,
    /// JSON over HTTP through the bridge.
    Http,
}

impl Protocol {
    /// Lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Grpc => "grpc",
            Self::Http => "http",
        }
    }
}

/// Identity established by the authentication stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    /// Scheme that produced the identity, e.g. `bearer`.
    pub auth_type: String,
    /// Project the caller belongs to.
    #[serde(default)]
    pub project_id: String,
    /// OAuth client.
    #[serde(default)]
    pub client_id: String,
    /// End user.
    #[serde(default)]
    pub user_id: String,
    /// Device.
    #[serde(default)]
    pub device_id: String,
    /// Organization.
    #[serde(default)]
    pub organization_id: String,
}

impl AuthInfo {
    /// Creates an identity for the given scheme.
    pub fn new(auth_type: impl Into<String>) -> Self {
        Self {
            auth_type: auth_type.into(),
            ..Self::default()
        }
    }

    /// Sets the user id.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Sets the client id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Sets the device id.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Looks up an id by its meta-tag name (`client_id`, `user_id`, ...).
    pub fn tag(&self, name: &str) -> Option<&str> {
        let value = match name {
            "project_id" => &self.project_id,
            "client_id" => &self.client_id,
            "user_id" => &self.user_id,
            "device_id" => &self.device_id,
            "organization_id" => &self.organization_id,
            _ => return None,
        };
        Some(value.as_str()).filter(|v| !v.is_empty())
    }

    /// Principal name used by authorization rules.
    pub fn principal(&self) -> &str {
        [&self.user_id, &self.client_id, &self.device_id]
            .into_iter()
            .find(|v| !v.is_empty())
            .map_or("", String::as_str)
    }
}

/// Headers and trailers a handler attaches to its response.
///
/// Shared between the handler (writer) and the protocol front end (reader),
/// which reads it once the handler has returned.
#[derive(Debug, Clone, Default)]
pub struct ResponseMetadata {
    inner: Arc<Mutex<ResponseMetadataInner>>,
}

#[derive(Debug, Default)]
struct ResponseMetadataInner {
    headers: HeaderMap,
    trailers: HeaderMap,
}

impl ResponseMetadata {
    /// Adds a response header.
    pub fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.lock().headers.append(name, value);
    }

    /// Adds a response trailer.
    pub fn append_trailer(&self, name: HeaderName, value: HeaderValue) {
        self.inner.lock().trailers.append(name, value);
    }

    /// Snapshot of the headers set so far.
    pub fn headers(&self) -> HeaderMap {
        self.inner.lock().headers.clone()
    }

    /// Snapshot of the trailers set so far.
    pub fn trailers(&self) -> HeaderMap {
        self.inner.lock().trailers.clone()
    }
}

/// Per-call state handed to interceptors and handlers.
#[derive(Debug, Clone)]
pub struct CallContext {
    request_id: RequestId,
    meta: Arc<CallMeta>,
    protocol: Protocol,
    metadata: HeaderMap,
    peer: Option<SocketAddr>,
    timeout: Option<Duration>,
    started_at: Instant,
    cancellation: CancellationToken,
    auth: Option<AuthInfo>,
    response: ResponseMetadata,
    extensions: http::Extensions,
}

impl CallContext {
    /// Creates a context for a call described by `meta` with the given incoming metadata.
    pub fn new(meta: Arc<CallMeta>, protocol: Protocol, metadata: HeaderMap) -> Self {
        Self {
            request_id: RequestId::from_metadata(&metadata),
            meta,
            protocol,
            metadata,
            peer: None,
            timeout: None,
            started_at: Instant::now(),
            cancellation: CancellationToken::new(),
            auth: None,
            response: ResponseMetadata::default(),
            extensions: http::Extensions::new(),
        }
    }

    /// Sets the remote address.
    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }

    /// Sets the call timeout, measured from context creation.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Uses an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Request identifier (forwarded or generated).
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Call descriptor.
    pub fn meta(&self) -> &CallMeta {
        &self.meta
    }

    /// Shared call descriptor.
    pub fn meta_arc(&self) -> Arc<CallMeta> {
        Arc::clone(&self.meta)
    }

    /// Protocol the call arrived on.
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Incoming metadata.
    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    /// Mutable incoming metadata.
    pub fn metadata_mut(&mut self) -> &mut HeaderMap {
        &mut self.metadata
    }

    /// First value of an incoming metadata key as text.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.to_str().ok())
    }

    /// Remote address, when known.
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Absolute deadline, if the caller set a timeout.
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| self.started_at + t)
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// When the call started.
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time since the call started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Token cancelled when the caller goes away.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the call has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Authenticated identity, once the authentication stage ran.
    pub fn auth(&self) -> Option<&AuthInfo> {
        self.auth.as_ref()
    }

    /// Records the authenticated identity.
    pub fn set_auth(&mut self, auth: AuthInfo) {
        self.auth = Some(auth);
    }

    /// Response metadata sink.
    pub fn response_metadata(&self) -> &ResponseMetadata {
        &self.response
    }

    /// Sets a response header.
    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.response.append_header(name, value);
    }

    /// Sets a response trailer.
    pub fn set_trailer(&self, name: HeaderName, value: HeaderValue) {
        self.response.append_trailer(name, value);
    }

    /// Typed extensions for custom interceptors.
    pub fn extensions(&self) -> &http::Extensions {
        &self.extensions
    }

    /// Mutable typed extensions.
    pub fn extensions_mut(&mut self) -> &mut http::Extensions {
        &mut self.extensions
    }
}
