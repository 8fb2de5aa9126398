//! Lifecycle and graceful shutdown over real sockets.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::rt::TokioExecutor;
use janus_core::{CallContext, Status};
use janus_server::{
    Lifecycle, LifecycleError, Server, ServerConfig, ServerError, ServerState, ServiceRegistry, ServingStatus,
    TransportError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
struct Job {
    #[prost(uint64, tag = "1")]
    #[serde(default)]
    millis: u64,
}

impl janus_core::Message for Job {}

fn config() -> ServerConfig {
    ServerConfig::builder()
        .http_addr("127.0.0.1:0")
        .grpc_addr("127.0.0.1:0")
        .metrics_addr("")
        .shutdown_timeout(Duration::from_secs(5))
        .build()
}

fn services() -> ServiceRegistry {
    let mut services = ServiceRegistry::new();
    services
        .register_unary("work.Jobs", "Run", |_ctx: CallContext, req: Job| async move {
            tokio::time::sleep(Duration::from_millis(req.millis)).await;
            Ok::<_, Status>(req)
        })
        .unwrap();
    services
}

#[tokio::test]
async fn test_long_call_finishes_during_shutdown() {
    let server = Server::builder().config(config()).services(services()).build().unwrap();
    let running = server.start().await.unwrap();
    let addr = running.http_addr().unwrap();
    let mut state = running.state();

    let call = tokio::spawn(async move {
        let client = HttpClient::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
        let request = http::Request::post(format!("http://{addr}/work.Jobs/Run"))
            .body(Full::new(Bytes::from_static(br#"{"millis":400}"#)))
            .unwrap();
        let response = client.request(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let handle = running.shutdown_handle();
    handle.shutdown();

    state.wait_for(|s| *s != ServerState::Listening).await.unwrap();
    assert_eq!(server.health().status(), ServingStatus::NotServing);

    let (status, body) = call.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(br#"{"millis":400}"#));

    running.wait().await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stopped_stays_terminal_after_early_shutdown() {
    for _ in 0..50 {
        let server = Server::builder().config(config()).build().unwrap();
        server.shutdown_handle().shutdown();

        let running = server.start().await.unwrap();
        running.wait().await.unwrap();

        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(server.health().status(), ServingStatus::NotServing);
    }
}

#[tokio::test]
async fn test_hooks_and_closers_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let record = |name: &'static str| {
        let order = Arc::clone(&order);
        move || {
            order.lock().push(name);
            async { Ok::<_, LifecycleError>(()) }
        }
    };
    let lifecycle = Lifecycle::new()
        .on_startup_named("start_a", record("start_a"))
        .on_startup_named("start_b", record("start_b"))
        .on_shutdown_named("stop_a", record("stop_a"))
        .on_shutdown_named("stop_b", record("stop_b"));

    let closed = |name: &'static str| {
        let order = Arc::clone(&order);
        move |_token| async move {
            order.lock().push(name);
            Ok(())
        }
    };
    let server = Server::builder()
        .config(config())
        .lifecycle(lifecycle)
        .closer("close_a", closed("close_a"))
        .closer("close_b", closed("close_b"))
        .build()
        .unwrap();

    let running = server.start().await.unwrap();
    assert_eq!(*order.lock(), vec!["start_a", "start_b"]);

    running.stop().await.unwrap();
    assert_eq!(
        *order.lock(),
        vec!["start_a", "start_b", "close_b", "close_a", "stop_b", "stop_a"]
    );
}

#[tokio::test]
async fn test_startup_hook_failure() {
    let lifecycle = Lifecycle::new().on_startup_named("db", || async { Err(LifecycleError::new("unreachable")) });
    let server = Server::builder().config(config()).lifecycle(lifecycle).build().unwrap();

    let err = server.start().await.unwrap_err();
    assert_eq!(err.to_string(), "startup hook db failed: unreachable");
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_closer_failure_is_reported() {
    let server = Server::builder()
        .config(config())
        .closer("cache", |_token| async { Err(anyhow::anyhow!("flush failed")) })
        .build()
        .unwrap();

    let running = server.start().await.unwrap();
    let err = running.stop().await.unwrap_err();
    assert!(matches!(err, ServerError::Close(_)));
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_bind_conflict() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();
    let config = ServerConfig::builder()
        .http_addr(format!("127.0.0.1:{port}"))
        .grpc_addr("127.0.0.1:0")
        .metrics_addr("")
        .build();

    let server = Server::builder().config(config).build().unwrap();
    let err = server.start().await.unwrap_err();
    assert!(matches!(err, ServerError::Transport(TransportError::Bind { .. })));
}

#[tokio::test]
async fn test_metrics_listener() {
    let config = ServerConfig::builder()
        .http_addr("127.0.0.1:0")
        .grpc_addr("127.0.0.1:0")
        .metrics_addr("127.0.0.1:0")
        .build();
    let server = Server::builder().config(config).build().unwrap();
    let running = server.start().await.unwrap();
    let addr = running.metrics_addr().unwrap();

    let client = HttpClient::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
    let response = client
        .get(format!("http://{addr}/other").parse().unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    running.stop().await.unwrap();
}
