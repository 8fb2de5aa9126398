//! The gateway server.
//!
//! A [`Server`] owns three TCP listeners (JSON/HTTP, gRPC, metrics) and an
//! in-memory listener that serves gRPC for self-calls. Each listener gets
//! its own accept loop, all joined through [`Join`]; a failing loop drains
//! the whole server.
//!
//! # Shutdown
//!
//! `SIGINT`, `SIGTERM` or [`ShutdownHandle::shutdown`] start draining:
//!
//! 1. HTTP responses switch to `Connection: close`
//! 2. health flips to `NOT_SERVING`
//! 3. the pre-stop delay runs, if any
//! 4. HTTP stops accepting and drains under the shutdown timeout
//! 5. gRPC does the same; connections still open at the deadline are aborted
//! 6. the metrics listener stops
//! 7. closers run, then shutdown hooks
//!
//! # Example
//!
//! ```rust,no_run
//! use janus_server::{Server, ServerConfig, ServiceRegistry};
//!
//! # async fn run() -> Result<(), janus_server::ServerError> {
//! let server = Server::builder()
//!     .config(ServerConfig::builder().http_addr(":8080").grpc_addr(":8081").build())
//!     .services(ServiceRegistry::new())
//!     .build()?;
//!
//! server.run().await
//! # }
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use janus_core::{CloserStack, CodeRegistry, Join};
use janus_middleware::stages::{Authenticator, LoggingOptions};
use janus_middleware::{Pipeline, PipelineBuilder};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use crate::bridge::Bridge;
use crate::config::ServerConfig;
use crate::error::{RegistrationError, ServerError, ServerResult, TransportError};
use crate::grpc::GrpcService;
use crate::health::HealthRegistry;
use crate::http::HttpService;
use crate::lifecycle::Lifecycle;
use crate::memory::{memory_channel, Conn, Listener, MemoryListener};
use crate::router::{CustomHandler, RouteTable, RouteTarget};
use crate::service::ServiceRegistry;
use crate::shutdown::{drive_connection, ConnectionSignals, ConnectionTracker, ShutdownHandle};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Where a server is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Built, not started.
    Built,
    /// Accepting connections.
    Listening,
    /// Draining listeners and running closers.
    Draining,
    /// Done. Terminal.
    Stopped,
}

impl ServerState {
    /// Lowercase name, as shown on `/debug/vars`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::Listening => "listening",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

enum RouteSpec {
    Method(String),
    Custom(CustomHandler),
}

/// Builder for [`Server`].
#[must_use]
pub struct ServerBuilder {
    config: ServerConfig,
    services: ServiceRegistry,
    routes: Vec<(Method, String, RouteSpec)>,
    pipeline: Option<Pipeline>,
    authenticator: Option<InstallAuth>,
    codes: CodeRegistry,
    lifecycle: Lifecycle,
    closers: Arc<CloserStack>,
    health: HealthRegistry,
}

// adds the auth stage once the skip prefixes are known
type InstallAuth = Box<dyn FnOnce(PipelineBuilder, Vec<String>) -> PipelineBuilder + Send>;

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("methods", &self.services.len())
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            config: ServerConfig::default(),
            services: ServiceRegistry::new(),
            routes: Vec::new(),
            pipeline: None,
            authenticator: None,
            codes: CodeRegistry::new(),
            lifecycle: Lifecycle::new(),
            closers: Arc::new(CloserStack::new()),
            health: HealthRegistry::new(),
        }
    }
}

impl ServerBuilder {
    /// Sets the server configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the registered methods.
    pub fn services(mut self, services: ServiceRegistry) -> Self {
        self.services = services;
        self
    }

    /// Binds an HTTP route to a registered method, e.g.
    /// `route(Method::GET, "/v1/users/{user_id}", "/demo.Users/Get")`.
    pub fn route(mut self, method: Method, path: impl Into<String>, full_method: impl Into<String>) -> Self {
        self.routes.push((method, path.into(), RouteSpec::Method(full_method.into())));
        self
    }

    /// Binds an HTTP route to a custom handler.
    pub fn custom_route(mut self, method: Method, path: impl Into<String>, handler: CustomHandler) -> Self {
        self.routes.push((method, path.into(), RouteSpec::Custom(handler)));
        self
    }

    /// Sets the interceptor pipeline.
    ///
    /// Without one, calls get validation, metrics, logging and recovery.
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Authenticates calls in the default pipeline. Methods under the
    /// configured `skip_auth` prefixes and the health service are let through.
    ///
    /// Cannot be combined with [`pipeline`](Self::pipeline); add the
    /// authenticator to that pipeline instead.
    pub fn authenticator<A: Authenticator>(mut self, authenticator: A) -> Self {
        self.authenticator = Some(Box::new(move |builder: PipelineBuilder, skip: Vec<String>| {
            builder.authenticator(authenticator, skip)
        }));
        self
    }

    /// Sets the names of application error codes.
    pub fn codes(mut self, codes: CodeRegistry) -> Self {
        self.codes = codes;
        self
    }

    /// Sets the startup and shutdown hooks.
    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Uses `closers` as the server's closer stack.
    pub fn closers(mut self, closers: Arc<CloserStack>) -> Self {
        self.closers = closers;
        self
    }

    /// Adds a closer run after the listeners stopped. Its token is
    /// cancelled when the closer times out.
    pub fn closer<F, Fut>(self, name: impl Into<String>, close: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.add(name, close);
        self
    }

    /// Uses `health` as the server's health registry.
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    /// Builds the server: registers the health service, resolves routes and
    /// adds a `POST /<service>/<method>` route per method when enabled.
    ///
    /// # Errors
    ///
    /// `Registration` for duplicate methods or routes, invalid paths and
    /// routes naming unknown methods. `AuthenticatorWithPipeline` when both
    /// an authenticator and a pipeline were set.
    pub fn build(self) -> ServerResult<Server> {
        let Self {
            config,
            mut services,
            routes: route_specs,
            pipeline,
            authenticator,
            codes,
            lifecycle,
            closers,
            health,
        } = self;

        let pipeline = match (pipeline, authenticator) {
            (Some(_), Some(_)) => return Err(ServerError::AuthenticatorWithPipeline),
            (Some(pipeline), None) => pipeline,
            (None, authenticator) => {
                let mut builder = Pipeline::builder()
                    .validation()
                    .metrics()
                    .logging(LoggingOptions::default())
                    .recovery();
                if let Some(install) = authenticator {
                    builder = install(builder, config.skip_auth().to_vec());
                }
                builder.build()
            }
        };

        health.register(&mut services)?;
        let table = services.into_table();

        let mut routes = RouteTable::new();
        for (method, path, spec) in route_specs {
            let target = match spec {
                RouteSpec::Method(name) => {
                    let entry = table.get(&name).ok_or(RegistrationError::UnknownMethod(name))?;
                    RouteTarget::Method(Arc::clone(entry))
                }
                RouteSpec::Custom(handler) => RouteTarget::Custom(handler),
            };
            routes.add(method, &path, target)?;
        }
        if config.auto_http() {
            for (name, entry) in table.iter() {
                if routes.match_route(&Method::POST, name).is_none() {
                    routes.add(Method::POST, name, RouteTarget::Method(Arc::clone(entry)))?;
                }
            }
        }

        let (state, state_rx) = watch::channel(ServerState::Built);
        let bridge = Bridge::new(
            pipeline.clone(),
            config.marshaler(),
            Arc::new(codes),
            config.propagate_tracing(),
        );
        let http = HttpService::new(routes, bridge, health.clone(), state_rx, config.cors());
        let grpc = GrpcService::new(table, pipeline);

        Ok(Server {
            inner: Arc::new(Inner {
                config,
                grpc: Arc::new(grpc),
                http: Arc::new(http),
                health,
                lifecycle,
                closers,
                state,
                shutdown: ShutdownHandle::new(),
                memory: MemoryListener::new(),
                started: AtomicBool::new(false),
            }),
        })
    }
}

struct Inner {
    config: ServerConfig,
    grpc: Arc<GrpcService>,
    http: Arc<HttpService>,
    health: HealthRegistry,
    lifecycle: Lifecycle,
    closers: Arc<CloserStack>,
    state: watch::Sender<ServerState>,
    shutdown: ShutdownHandle,
    memory: MemoryListener,
    started: AtomicBool,
}

/// The dual-protocol gateway server. Clones share the server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// One listener's accept side plus the signals of its connections.
struct ListenerControl {
    name: &'static str,
    stop: CancellationToken,
    signals: ConnectionSignals,
    tracker: ConnectionTracker,
}

impl ListenerControl {
    fn new(name: &'static str, max_age: Option<Duration>) -> Self {
        Self {
            name,
            stop: CancellationToken::new(),
            signals: ConnectionSignals {
                max_age,
                drain: CancellationToken::new(),
                force: CancellationToken::new(),
            },
            tracker: ConnectionTracker::new(),
        }
    }

    /// Stops accepting, drains under `timeout`, then aborts what is left.
    async fn drain(&self, timeout: Duration) {
        self.stop.cancel();
        self.signals.drain.cancel();
        let open = self.tracker.active_connections();
        if tokio::time::timeout(timeout, self.tracker.wait_idle()).await.is_err() {
            tracing::warn!(
                listener = self.name,
                open = self.tracker.active_connections(),
                "drain deadline passed, aborting connections"
            );
            self.signals.force.cancel();
            self.tracker.wait_idle().await;
        }
        tracing::info!(listener = self.name, drained = open, "listener stopped");
    }
}

impl Server {
    /// Creates a builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.inner.state.borrow()
    }

    /// Receiver observing state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.inner.state.subscribe()
    }

    /// The health registry behind `/healthz` and `grpc.health.v1.Health`.
    #[must_use]
    pub fn health(&self) -> &HealthRegistry {
        &self.inner.health
    }

    /// Handle that starts draining.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.inner.shutdown.clone()
    }

    /// The server's closer stack.
    #[must_use]
    pub fn closers(&self) -> &Arc<CloserStack> {
        &self.inner.closers
    }

    /// The HTTP route table.
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        self.inner.http.routes()
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// A gRPC channel to this server through the memory listener.
    ///
    /// Connects lazily; calls wait until the server is listening.
    #[must_use]
    pub fn memory_channel(&self) -> Channel {
        memory_channel(&self.inner.memory)
    }

    /// Starts the server, then drains on OS signals, and waits for it to stop.
    ///
    /// # Errors
    ///
    /// Startup failures, a failing listener, and closer or shutdown hook
    /// failures.
    pub async fn run(&self) -> ServerResult<()> {
        let running = self.start().await?;
        self.inner.shutdown.listen_os_signals();
        running.wait().await
    }

    /// Runs startup hooks, binds the listeners and starts serving.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` on a second call, `Lifecycle` when a startup hook
    /// fails, `InvalidAddress` and `Transport` when a listener cannot bind.
    pub async fn start(&self) -> ServerResult<Running> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }

        if let Err(e) = self.inner.lifecycle.run_startup().await {
            self.inner.set_state(ServerState::Stopped);
            return Err(e.into());
        }

        let listeners = match self.bind().await {
            Ok(listeners) => listeners,
            Err(e) => {
                tracing::error!(error = %e, "failed to bind listeners");
                self.inner.set_state(ServerState::Draining);
                if let Err(close) = self.inner.release().await {
                    tracing::error!(error = %close, "cleanup after bind failure failed");
                }
                self.inner.set_state(ServerState::Stopped);
                return Err(e);
            }
        };

        let http_addr = listeners.http.local_addr();
        let grpc_addr = listeners.grpc.local_addr();
        let metrics_addr = listeners.metrics.as_ref().and_then(Listener::local_addr);

        // published before serve runs, so a quick drain always lands after it
        self.inner.set_state(ServerState::Listening);
        self.inner.health.set_serving();

        let running = Running {
            http_addr,
            grpc_addr,
            metrics_addr,
            shutdown: self.inner.shutdown.clone(),
            state: self.inner.state.subscribe(),
            task: tokio::spawn(Arc::clone(&self.inner).serve(listeners)),
        };
        tracing::info!(
            http = ?running.http_addr,
            grpc = ?running.grpc_addr,
            metrics = ?running.metrics_addr,
            "server listening"
        );
        Ok(running)
    }

    async fn bind(&self) -> ServerResult<Listeners> {
        let config = &self.inner.config;
        let http = Listener::bind(config.http_socket_addr()?).await?;
        let grpc = Listener::bind(config.grpc_socket_addr()?).await?;
        let metrics = match config.metrics_socket_addr()? {
            Some(addr) => Some(Listener::bind(addr).await?),
            None => None,
        };
        Ok(Listeners { http, grpc, metrics })
    }
}

struct Listeners {
    http: Listener,
    grpc: Listener,
    metrics: Option<Listener>,
}

impl Inner {
    /// Moves to `next`. `Stopped` is terminal.
    fn set_state(&self, next: ServerState) {
        self.state.send_if_modified(|state| {
            if *state == ServerState::Stopped || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    async fn serve(self: Arc<Self>, listeners: Listeners) -> ServerResult<()> {
        let http = ListenerControl::new("http", None);
        let grpc = ListenerControl::new("grpc", self.config.max_connection_age());
        let metrics = ListenerControl::new("metrics", None);

        let mut join: Join<TransportError> = Join::new(CancellationToken::new());
        {
            let service = Arc::clone(&self.http);
            join.spawn(|_| {
                accept_loop(listeners.http, &http, move |conn, peer, signals| {
                    Arc::clone(&service).serve_connection(conn, peer, signals)
                })
            });
        }
        for listener in [listeners.grpc, Listener::Memory(self.memory.clone())] {
            let service = Arc::clone(&self.grpc);
            join.spawn(|_| {
                accept_loop(listener, &grpc, move |conn, peer, signals| {
                    Arc::clone(&service).serve_connection(conn, peer, signals)
                })
            });
        }
        if let Some(listener) = listeners.metrics {
            join.spawn(|_| accept_loop(listener, &metrics, |conn, _peer, signals| serve_metrics(conn, signals)));
        }

        let joined = join.join();
        tokio::pin!(joined);
        let (failure, joined_early) = tokio::select! {
            () = self.shutdown.recv() => (None, false),
            result = &mut joined => match result {
                Ok(()) => (None, true),
                Err(e) => {
                    let e = ServerError::from(e);
                    tracing::error!(error = %e, "listener failed, draining");
                    (Some(e), true)
                }
            },
        };

        let outcome = self.drain(&http, &grpc, &metrics).await;
        if !joined_early {
            // the accept loops have returned by now
            if let Err(e) = joined.await {
                tracing::debug!(error = %e, "accept loop ended with error during drain");
            }
        }
        self.set_state(ServerState::Stopped);
        tracing::info!("server stopped");

        match failure {
            Some(e) => Err(e),
            None => outcome,
        }
    }

    async fn drain(&self, http: &ListenerControl, grpc: &ListenerControl, metrics: &ListenerControl) -> ServerResult<()> {
        self.http.disable_keep_alive();
        self.health.set_not_serving();
        self.set_state(ServerState::Draining);
        tracing::info!("draining");

        if let Some(delay) = self.config.pre_stop() {
            tracing::info!(delay = ?delay, "waiting before closing listeners");
            tokio::time::sleep(delay).await;
        }

        let timeout = self.config.shutdown_timeout();
        http.drain(timeout).await;
        self.memory.close();
        grpc.drain(timeout).await;
        metrics.drain(timeout).await;

        self.release().await
    }

    /// Runs the closer stack, then shutdown hooks.
    async fn release(&self) -> ServerResult<()> {
        let closed = self.closers.run().await;
        let hooks = self.lifecycle.run_shutdown().await;
        closed?;
        hooks?;
        Ok(())
    }
}

/// A started server.
#[derive(Debug)]
pub struct Running {
    http_addr: Option<SocketAddr>,
    grpc_addr: Option<SocketAddr>,
    metrics_addr: Option<SocketAddr>,
    shutdown: ShutdownHandle,
    state: watch::Receiver<ServerState>,
    task: JoinHandle<ServerResult<()>>,
}

impl Running {
    /// Bound JSON/HTTP address.
    #[must_use]
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    /// Bound gRPC address.
    #[must_use]
    pub fn grpc_addr(&self) -> Option<SocketAddr> {
        self.grpc_addr
    }

    /// Bound metrics address; `None` when disabled.
    #[must_use]
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Handle that starts draining.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Receiver observing state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state.clone()
    }

    /// Waits until the server stopped.
    ///
    /// # Errors
    ///
    /// The error that stopped the server, if any.
    pub async fn wait(self) -> ServerResult<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ServerError::Panicked(e.to_string())),
        }
    }

    /// Starts draining and waits until the server stopped.
    ///
    /// # Errors
    ///
    /// Same as [`Running::wait`].
    pub async fn stop(self) -> ServerResult<()> {
        self.shutdown.shutdown();
        self.wait().await
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}

/// Accepts until stopped, serving each connection on its own task.
fn accept_loop<F, Fut>(
    listener: Listener,
    control: &ListenerControl,
    serve: F,
) -> impl Future<Output = Result<(), TransportError>> + Send + 'static
where
    F: Fn(Conn, Option<SocketAddr>, ConnectionSignals) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let name = control.name;
    let stop = control.stop.clone();
    let signals = control.signals.clone();
    let tracker = control.tracker.clone();
    async move {
        loop {
            let accepted = tokio::select! {
                () = stop.cancelled() => return Ok(()),
                accepted = listener.accept(name) => accepted,
            };
            match accepted {
                Ok((conn, peer)) => {
                    let token = tracker.acquire();
                    let connection = serve(conn, peer, signals.clone());
                    tokio::spawn(async move {
                        connection.await;
                        drop(token);
                    });
                }
                Err(TransportError::Accept { source, .. }) if is_transient(&source) => {
                    tracing::debug!(listener = name, error = %source, "transient accept error");
                }
                Err(TransportError::ListenerClosed) if stop.is_cancelled() => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

async fn serve_metrics(conn: Conn, signals: ConnectionSignals) {
    let service = hyper::service::service_fn(|request: http::Request<Incoming>| async move {
        let mut response = http::Response::new(Full::new(Bytes::new()));
        if request.uri().path() != "/metrics" {
            *response.status_mut() = StatusCode::NOT_FOUND;
            return Ok::<_, Infallible>(response);
        }
        match janus_telemetry::render_metrics() {
            Some(text) => {
                *response.body_mut() = Full::new(Bytes::from(text));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE));
            }
            None => *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE,
        }
        Ok(response)
    });
    let conn = hyper::server::conn::http1::Builder::new().serve_connection(TokioIo::new(conn), service);
    drive_connection(conn, "metrics", signals).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use http::HeaderMap;
    use janus_core::{AuthInfo, CallContext, Code, Status};
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    struct Ping {
        #[prost(string, tag = "1")]
        #[serde(default)]
        text: String,
    }

    impl janus_core::Message for Ping {}

    fn local_config() -> ServerConfig {
        ServerConfig::builder()
            .http_addr("127.0.0.1:0")
            .grpc_addr("127.0.0.1:0")
            .metrics_addr("")
            .shutdown_timeout(Duration::from_secs(2))
            .build()
    }

    fn services() -> ServiceRegistry {
        let mut services = ServiceRegistry::new();
        services
            .register_unary("demo.Ping", "Ping", |_ctx: CallContext, req: Ping| async move { Ok::<_, Status>(req) })
            .unwrap();
        services
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ServerState::Built.as_str(), "built");
        assert_eq!(ServerState::Stopped.as_str(), "stopped");
    }

    #[test]
    fn test_build_adds_auto_routes_and_health() {
        let server = Server::builder().config(local_config()).services(services()).build().unwrap();
        assert_eq!(server.state(), ServerState::Built);
        let routes = server.routes();
        assert!(routes.match_route(&Method::POST, "/demo.Ping/Ping").is_some());
        assert!(routes.match_route(&Method::POST, "/grpc.health.v1.Health/Check").is_some());
    }

    #[test]
    fn test_auto_routes_disabled() {
        let config = ServerConfig::builder().auto_http(false).build();
        let server = Server::builder().config(config).services(services()).build().unwrap();
        assert!(server.routes().is_empty());
    }

    #[test]
    fn test_route_to_unknown_method() {
        let err = Server::builder()
            .services(services())
            .route(Method::GET, "/v1/ping", "/demo.Ping/Missing")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::Registration(RegistrationError::UnknownMethod(ref name)) if name == "/demo.Ping/Missing"
        ));
    }

    #[test]
    fn test_explicit_route() {
        let server = Server::builder()
            .services(services())
            .route(Method::GET, "/v1/ping/{text}", "/demo.Ping/Ping")
            .build()
            .unwrap();
        let matched = server.routes().match_route(&Method::GET, "/v1/ping/hello").unwrap();
        assert_eq!(matched.param("text"), Some("hello"));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let server = Server::builder().config(local_config()).services(services()).build().unwrap();
        let running = server.start().await.unwrap();
        assert_eq!(server.state(), ServerState::Listening);
        assert!(server.health().is_serving());
        assert!(running.http_addr().is_some());
        assert!(running.metrics_addr().is_none());

        running.stop().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(!server.health().is_serving());
    }

    #[test]
    fn test_authenticator_needs_default_pipeline() {
        let err = Server::builder()
            .pipeline(Pipeline::default())
            .authenticator(|_ctx: &CallContext| Ok::<_, Status>(AuthInfo::new("bearer")))
            .build()
            .unwrap_err();
        assert!(matches!(err, ServerError::AuthenticatorWithPipeline));
    }

    #[tokio::test]
    async fn test_skip_auth_prefixes_from_config() {
        let config = ServerConfig::builder()
            .http_addr("127.0.0.1:0")
            .grpc_addr("127.0.0.1:0")
            .metrics_addr("")
            .skip_auth(vec!["/demo.Open/".to_string()])
            .build();
        let mut services = services();
        services
            .register_unary("demo.Open", "Ping", |_ctx: CallContext, req: Ping| async move { Ok::<_, Status>(req) })
            .unwrap();
        let server = Server::builder()
            .config(config)
            .services(services)
            .authenticator(|_ctx: &CallContext| Err::<AuthInfo, _>(Status::unauthenticated("missing token")))
            .build()
            .unwrap();
        let running = server.start().await.unwrap();

        let mut client = Client::new(server.memory_channel());
        let open: Ping = client
            .unary("/demo.Open/Ping", Ping { text: "hi".into() }, HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(open.text, "hi");

        let err = client
            .unary::<Ping, Ping>("/demo.Ping/Ping", Ping::default(), HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::UNAUTHENTICATED);

        running.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice() {
        let server = Server::builder().config(local_config()).build().unwrap();
        let running = server.start().await.unwrap();
        assert!(matches!(server.start().await, Err(ServerError::AlreadyStarted)));
        running.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_address_fails_start() {
        let config = ServerConfig::builder().http_addr("not an address").metrics_addr("").build();
        let server = Server::builder().config(config).build().unwrap();
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidAddress { listener: "http", .. }));
        assert_eq!(server.state(), ServerState::Stopped);
    }
}
