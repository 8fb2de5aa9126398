//! JSON/HTTP front end.
//!
//! Built-in paths (`/healthz`, `/favicon.ico`, `/debug/*`) are answered
//! here; everything else goes through the [`RouteTable`] to either the
//! bridge or a custom handler. CORS, cache and keep-alive headers are
//! written on the way out.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, EXPIRES, ORIGIN, VARY};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use http_body_util::BodyExt;
use hyper::body::{Body, Incoming};
use hyper_util::rt::{TokioExecutor, TokioIo};
use janus_core::duration::format_duration;
use janus_core::Status;
use janus_middleware::stages::panics_recovered;
use serde::Serialize;
use tokio::sync::watch;

use crate::bridge::{empty, full, Bridge, BridgeRequest, HttpResponse, JSON_CONTENT_TYPE};
use crate::health::{HealthRegistry, ServingStatus};
use crate::memory::Conn;
use crate::router::{RouteInfo, RouteTable, RouteTarget};
use crate::server::ServerState;
use crate::shutdown::{drive_connection, ConnectionSignals};

/// Header replacing the request method.
pub const METHOD_OVERRIDE_HEADER: &str = "x-http-method-override";

/// Header carrying the captcha token taken from the query string.
pub const CAPTCHA_HEADER: &str = "x-captcha-token";

const NOT_FOUND_MESSAGE: &str = "API NOT FOUND";
const ONE_YEAR: Duration = Duration::from_secs(365 * 24 * 60 * 60);
const CORS_ALLOW_METHODS: &str = "POST, GET, PUT, DELETE, PATCH, OPTIONS";
const CORS_ALLOW_HEADERS: &str =
    "Authorization, Content-Type, Accept, X-Project-Id, X-Device-Id, X-Request-Id, X-Request-Timestamp";
const CORS_MAX_AGE: &str = "86400";

#[derive(Serialize)]
struct DebugVars {
    state: &'static str,
    health: &'static str,
    uptime: String,
    in_flight: i64,
    panics_recovered: u64,
    routes: Vec<RouteInfo>,
}

/// Serves the route table over HTTP/1.1 and HTTP/2.
#[derive(Debug)]
pub struct HttpService {
    routes: RouteTable,
    bridge: Bridge,
    health: HealthRegistry,
    state: watch::Receiver<ServerState>,
    cors: bool,
    keep_alive: AtomicBool,
}

impl HttpService {
    /// Creates the service.
    pub fn new(
        routes: RouteTable,
        bridge: Bridge,
        health: HealthRegistry,
        state: watch::Receiver<ServerState>,
        cors: bool,
    ) -> Self {
        Self {
            routes,
            bridge,
            health,
            state,
            cors,
            keep_alive: AtomicBool::new(true),
        }
    }

    /// Stops keep-alive: later responses carry `Connection: close`.
    pub fn disable_keep_alive(&self) {
        self.keep_alive.store(false, Ordering::SeqCst);
    }

    /// Whether responses still allow keep-alive.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive.load(Ordering::SeqCst)
    }

    /// The route table.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Handles one request.
    pub async fn handle<B>(&self, request: http::Request<B>, peer: Option<SocketAddr>) -> HttpResponse
    where
        B: Body,
        B::Error: Display,
    {
        let (mut parts, body) = request.into_parts();
        apply_method_override(&mut parts);
        let path = parts.uri.path().to_string();
        let origin = parts.headers.get(ORIGIN).cloned();

        let mut response = if parts.method == Method::OPTIONS || parts.method == Method::HEAD {
            http::Response::new(empty())
        } else {
            match body.collect().await {
                Ok(collected) => {
                    apply_query_credentials(&mut parts);
                    self.route(parts, collected.to_bytes(), peer).await
                }
                Err(e) => self
                    .bridge
                    .error(&Status::invalid_argument(format!("failed to read request body: {e}"))),
            }
        };

        self.finish(&path, origin, response.headers_mut());
        response
    }

    async fn route(&self, parts: http::request::Parts, body: Bytes, peer: Option<SocketAddr>) -> HttpResponse {
        match parts.uri.path() {
            "/healthz" => return self.healthz(),
            "/favicon.ico" => return favicon(),
            "/debug/vars" => return self.debug_vars(),
            "/debug/routes" => return json_response(&self.routes.routes()),
            _ => {}
        }

        let Some(matched) = self.routes.match_route(&parts.method, parts.uri.path()) else {
            tracing::debug!(method = %parts.method, path = parts.uri.path(), "no route");
            return self.bridge.error(&Status::not_found(NOT_FOUND_MESSAGE));
        };
        let (target, params) = matched.into_parts();
        match target {
            RouteTarget::Method(entry) => {
                let request = BridgeRequest {
                    headers: parts.headers,
                    body,
                    params,
                    peer,
                };
                self.bridge.call(entry, request).await
            }
            RouteTarget::Custom(handler) => match handler(http::Request::from_parts(parts, body), params).await {
                Ok(response) => response.map(full),
                Err(status) => self.bridge.error(&status),
            },
        }
    }

    fn healthz(&self) -> HttpResponse {
        let status = self.health.status();
        let mut response = http::Response::new(full(status.as_str()));
        if status != ServingStatus::Serving {
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
        }
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        response
    }

    fn debug_vars(&self) -> HttpResponse {
        let vars = DebugVars {
            state: self.state.borrow().as_str(),
            health: self.health.status().as_str(),
            uptime: format_duration(Duration::from_secs(self.health.uptime().as_secs())),
            in_flight: janus_telemetry::in_flight(),
            panics_recovered: panics_recovered(),
            routes: self.routes.routes(),
        };
        json_response(&vars)
    }

    fn finish(&self, path: &str, origin: Option<HeaderValue>, headers: &mut HeaderMap) {
        if self.cors {
            if let Some(origin) = origin {
                headers.insert("access-control-allow-credentials", HeaderValue::from_static("true"));
                headers.insert("access-control-allow-origin", origin);
                headers.insert("access-control-allow-methods", HeaderValue::from_static(CORS_ALLOW_METHODS));
                headers.insert("access-control-allow-headers", HeaderValue::from_static(CORS_ALLOW_HEADERS));
                headers.insert("access-control-max-age", HeaderValue::from_static(CORS_MAX_AGE));
                headers.append(VARY, HeaderValue::from_static("Origin"));
            }
        }
        if !has_extension(path) && !headers.contains_key(CACHE_CONTROL) {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        }
        if !self.keep_alive() {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
    }

    /// Serves one accepted connection until it closes.
    pub async fn serve_connection(self: Arc<Self>, conn: Conn, peer: Option<SocketAddr>, signals: ConnectionSignals) {
        let service = hyper::service::service_fn(move |request: http::Request<Incoming>| {
            let http = Arc::clone(&self);
            async move { Ok::<_, std::convert::Infallible>(http.handle(request, peer).await) }
        });
        let builder = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
        let conn = builder.serve_connection(TokioIo::new(conn), service);
        drive_connection(conn, "http", signals).await;
    }
}

fn json_response<T: Serialize>(value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = http::Response::new(full(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to encode debug response");
            let mut response = http::Response::new(empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

fn favicon() -> HttpResponse {
    let mut response = http::Response::new(empty());
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=31536000"));
    if let Ok(expires) = HeaderValue::from_str(&httpdate::fmt_http_date(SystemTime::now() + ONE_YEAR)) {
        headers.insert(EXPIRES, expires);
    }
    response
}

fn has_extension(path: &str) -> bool {
    path.rsplit('/').next().is_some_and(|last| last.contains('.'))
}

fn apply_method_override(parts: &mut http::request::Parts) {
    let Some(value) = parts.headers.get(METHOD_OVERRIDE_HEADER) else {
        return;
    };
    match Method::from_bytes(value.as_bytes()) {
        Ok(method) => parts.method = method,
        Err(_) => tracing::debug!(value = ?value, "ignoring invalid method override"),
    }
}

/// Moves `access_token` and `captcha_token` from the query into headers.
fn apply_query_credentials(parts: &mut http::request::Parts) {
    let Some(query) = parts.uri.query() else {
        return;
    };
    let Ok(pairs) = serde_urlencoded::from_str::<Vec<(String, String)>>(query) else {
        return;
    };
    for (key, value) in pairs {
        let (name, value) = match key.as_str() {
            "access_token" => ("authorization", format!("Bearer {value}")),
            "captcha_token" => (CAPTCHA_HEADER, value),
            _ => continue,
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            parts.headers.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use janus_core::{CallContext, CodeRegistry, ErrorBody};
    use janus_middleware::Pipeline;
    use serde::Deserialize;
    use serde_json::Value;

    use crate::marshal::JsonMarshaler;
    use crate::router::custom_handler;
    use crate::service::ServiceRegistry;

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    struct Echo {
        #[prost(string, tag = "1")]
        #[serde(default)]
        text: String,
        #[prost(string, tag = "2")]
        #[serde(default)]
        auth: String,
    }

    impl janus_core::Message for Echo {}

    fn service(health: HealthRegistry) -> (HttpService, watch::Sender<ServerState>) {
        let mut registry = ServiceRegistry::new();
        registry
            .register_unary("demo.Echo", "Say", |ctx: CallContext, req: Echo| async move {
                let auth = ctx.metadata_value("authorization").unwrap_or_default().to_string();
                Ok::<_, janus_core::Status>(Echo { auth, ..req })
            })
            .unwrap();
        let entry = registry.get("/demo.Echo/Say").unwrap().clone();

        let mut routes = RouteTable::new();
        routes.add(Method::POST, "/demo.Echo/Say", RouteTarget::Method(entry)).unwrap();
        routes
            .add(
                Method::GET,
                "/v1/hello/{name}",
                RouteTarget::Custom(custom_handler(|_req, params| async move {
                    Ok(http::Response::new(Bytes::from(format!("hi {}", params["name"]))))
                })),
            )
            .unwrap();

        let bridge = Bridge::new(Pipeline::default(), JsonMarshaler::default(), Arc::new(CodeRegistry::new()), true);
        let (tx, rx) = watch::channel(ServerState::Listening);
        (HttpService::new(routes, bridge, health, rx, true), tx)
    }

    fn get(uri: &str) -> http::Request<http_body_util::Full<Bytes>> {
        http::Request::get(uri).body(http_body_util::Full::new(Bytes::new())).unwrap()
    }

    fn post(uri: &str, body: &'static str) -> http::Request<http_body_util::Full<Bytes>> {
        http::Request::post(uri)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(http_body_util::Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    async fn body_bytes(response: HttpResponse) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_healthz_follows_registry() {
        let health = HealthRegistry::new();
        let (http, _state) = service(health.clone());

        let response = http.handle(get("/healthz"), None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_bytes(response).await, "NOT_SERVING");

        health.set_serving();
        let response = http.handle(get("/healthz"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, "SERVING");
    }

    #[tokio::test]
    async fn test_favicon_headers() {
        let (http, _state) = service(HealthRegistry::new());
        let response = http.handle(get("/favicon.ico"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CACHE_CONTROL], "public, max-age=31536000");
        assert!(response.headers().contains_key(EXPIRES));
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let (http, _state) = service(HealthRegistry::new());
        let response = http.handle(get("/nope"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");
        let body = ErrorBody::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body.error_description, NOT_FOUND_MESSAGE);
    }

    #[tokio::test]
    async fn test_wrong_method_on_bridged_path() {
        let (http, _state) = service(HealthRegistry::new());
        let response = http.handle(get("/demo.Echo/Say"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bridged_call_with_query_token() {
        let (http, _state) = service(HealthRegistry::new());
        let response = http
            .handle(post("/demo.Echo/Say?access_token=abc&other=1", r#"{"text":"hi"}"#), None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["text"], "hi");
        assert_eq!(body["auth"], "Bearer abc");
    }

    #[tokio::test]
    async fn test_method_override() {
        let (http, _state) = service(HealthRegistry::new());
        let request = http::Request::get("/demo.Echo/Say")
            .header(METHOD_OVERRIDE_HEADER, "POST")
            .body(http_body_util::Full::new(Bytes::from_static(b"{}")))
            .unwrap();
        let response = http.handle(request, None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_route() {
        let (http, _state) = service(HealthRegistry::new());
        let response = http.handle(get("/v1/hello/ana"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, "hi ana");
    }

    #[tokio::test]
    async fn test_cors_and_preflight() {
        let (http, _state) = service(HealthRegistry::new());
        let request = http::Request::options("/demo.Echo/Say")
            .header(ORIGIN, "https://app.example.com")
            .body(http_body_util::Full::new(Bytes::new()))
            .unwrap();
        let response = http.handle(request, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "https://app.example.com");
        assert_eq!(headers["access-control-allow-credentials"], "true");
        assert_eq!(headers["access-control-max-age"], "86400");
        assert_eq!(headers[VARY], "Origin");
    }

    #[tokio::test]
    async fn test_keep_alive_off_closes_connection() {
        let (http, _state) = service(HealthRegistry::new());
        let response = http.handle(get("/healthz"), None).await;
        assert!(!response.headers().contains_key(CONNECTION));

        http.disable_keep_alive();
        let response = http.handle(get("/healthz"), None).await;
        assert_eq!(response.headers()[CONNECTION], "close");
    }

    #[tokio::test]
    async fn test_debug_vars() {
        let (http, state) = service(HealthRegistry::new());
        state.send_replace(ServerState::Draining);
        let response = http.handle(get("/debug/vars"), None).await;
        let vars: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(vars["state"], "draining");
        assert_eq!(vars["health"], "NOT_SERVING");
        assert_eq!(vars["routes"].as_array().unwrap().len(), 2);
        assert_eq!(vars["routes"][0]["target"], "/demo.Echo/Say");
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension("/static/app.js"));
        assert!(!has_extension("/demo.Echo/Say"));
        assert!(!has_extension("/"));
    }
}
