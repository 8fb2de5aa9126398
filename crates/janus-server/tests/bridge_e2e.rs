//! End-to-end tests over real sockets.
//!
//! A server is started on ephemeral ports and called both natively over
//! gRPC and over JSON/HTTP through the bridge:
//!
//! 1. Both protocols produce the same JSON for the same input
//! 2. Handler errors keep their code, name and message on both protocols
//! 3. A panicking handler yields one internal error and the server keeps serving
//! 4. Self-calls work through the memory channel

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::rt::TokioExecutor;
use janus_core::{CallContext, Code, CodeRegistry, ErrorBody, Status};
use janus_server::{Client, JsonMarshaler, Running, Server, ServerConfig, ServiceRegistry, ServingStatus};
use serde::{Deserialize, Serialize};
use tokio_test::assert_ok;

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
struct Order {
    #[prost(string, tag = "1")]
    #[serde(default)]
    id: String,
    #[prost(int64, tag = "2")]
    #[serde(default)]
    quantity: i64,
    #[prost(string, tag = "3")]
    #[serde(default)]
    note: String,
}

impl janus_core::Message for Order {}

fn services() -> ServiceRegistry {
    let mut services = ServiceRegistry::new();
    services
        .register_unary("shop.Orders", "Get", |_ctx: CallContext, req: Order| async move {
            match req.id.as_str() {
                "missing" => Err(Status::not_found("order missing")),
                "legacy" => Err(Status::new(Code::new(4404), "order archived")),
                _ => Ok(Order {
                    quantity: 3,
                    note: "fresh".to_string(),
                    ..req
                }),
            }
        })
        .unwrap()
        .register_unary("shop.Orders", "Explode", |_ctx: CallContext, req: Order| async move {
            if req.id.is_empty() {
                panic!("kaboom");
            }
            Ok::<_, Status>(req)
        })
        .unwrap();
    services
}

async fn start() -> (Server, Running) {
    let config = ServerConfig::builder()
        .http_addr("127.0.0.1:0")
        .grpc_addr("127.0.0.1:0")
        .metrics_addr("")
        .shutdown_timeout(Duration::from_secs(2))
        .build();
    let mut codes = CodeRegistry::new();
    codes.register([(4404, "custom_not_found")]);

    let server = Server::builder()
        .config(config)
        .services(services())
        .codes(codes)
        .build()
        .unwrap();
    let running = server.start().await.unwrap();
    (server, running)
}

async fn post(running: &Running, path: &str, body: &'static str) -> (StatusCode, Bytes) {
    let client = HttpClient::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
    let request = http::Request::post(format!("http://{}{path}", running.http_addr().unwrap()))
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap();
    let response = client.request(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn grpc_client(running: &Running) -> Client {
    let channel = tonic::transport::Endpoint::from_shared(format!("http://{}", running.grpc_addr().unwrap()))
        .unwrap()
        .connect()
        .await
        .unwrap();
    Client::new(channel)
}

#[tokio::test]
async fn test_bridged_and_native_json_match() {
    let (_server, running) = start().await;

    let (status, http_body) = post(&running, "/shop.Orders/Get", r#"{"id":"o-1"}"#).await;
    assert_eq!(status, StatusCode::OK);

    let mut client = grpc_client(&running).await;
    let native: Order = client
        .unary(
            "/shop.Orders/Get",
            Order {
                id: "o-1".to_string(),
                ..Order::default()
            },
            HeaderMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(native.quantity, 3);

    let native_json = JsonMarshaler::default().marshal(&native).unwrap();
    assert_eq!(http_body, Bytes::from(native_json));

    assert_ok!(running.stop().await);
}

#[tokio::test]
async fn test_errors_on_both_protocols() {
    let (_server, running) = start().await;

    let (status, body) = post(&running, "/shop.Orders/Get", r#"{"id":"missing"}"#).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body = ErrorBody::from_slice(&body).unwrap();
    assert_eq!(body.error, "not_found");
    assert_eq!(body.error_code, 5);
    assert_eq!(body.error_description, "order missing");

    let (status, body) = post(&running, "/shop.Orders/Get", r#"{"id":"legacy"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = ErrorBody::from_slice(&body).unwrap();
    assert_eq!(body.error, "custom_not_found");
    assert_eq!(body.error_code, 4404);

    let mut client = grpc_client(&running).await;
    let err = client
        .unary::<Order, Order>(
            "/shop.Orders/Get",
            Order {
                id: "legacy".to_string(),
                ..Order::default()
            },
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::new(4404));
    assert_eq!(err.message(), "order archived");

    let err = client
        .unary::<Order, Order>("/shop.Orders/Nope", Order::default(), HeaderMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::UNIMPLEMENTED);

    assert_ok!(running.stop().await);
}

#[tokio::test]
async fn test_panic_is_contained() {
    let (_server, running) = start().await;
    let before = janus_middleware::stages::panics_recovered();

    let (status, body) = post(&running, "/shop.Orders/Explode", "{}").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody::from_slice(&body).unwrap();
    assert_eq!(body.error, "internal");
    assert_eq!(body.error_description, "kaboom");
    assert!(janus_middleware::stages::panics_recovered() > before);

    let (status, _) = post(&running, "/shop.Orders/Explode", r#"{"id":"fine"}"#).await;
    assert_eq!(status, StatusCode::OK);

    assert_ok!(running.stop().await);
}

#[tokio::test]
async fn test_unknown_http_path() {
    let (_server, running) = start().await;
    let (status, body) = post(&running, "/shop.Orders/Missing", "{}").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body = ErrorBody::from_slice(&body).unwrap();
    assert_eq!(body.error_description, "API NOT FOUND");
    assert_ok!(running.stop().await);
}

#[tokio::test]
async fn test_memory_channel_self_call() {
    let (server, running) = start().await;

    let mut client = Client::new(server.memory_channel());
    assert_eq!(client.check_health().await.unwrap(), ServingStatus::Serving);

    let order: Order = client
        .unary(
            "/shop.Orders/Get",
            Order {
                id: "o-2".to_string(),
                ..Order::default()
            },
            HeaderMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(order.note, "fresh");

    assert_ok!(running.stop().await);
}
