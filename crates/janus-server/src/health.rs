//! `grpc.health.v1.Health` and the aggregate serving status.
//!
//! One status covers the whole server: `Check` and `Watch` answer with it
//! whatever service name is asked for, and `/healthz` on the HTTP listener
//! reads the same value. The server flips it to `SERVING` once listening
//! and back to `NOT_SERVING` as the first step of draining.
//!
//! # Example
//!
//! ```rust
//! use janus_server::{HealthRegistry, ServingStatus};
//!
//! let health = HealthRegistry::new();
//! assert_eq!(health.status(), ServingStatus::NotServing);
//!
//! health.set_serving();
//! assert!(health.is_serving());
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use janus_core::{CallContext, Message, MessageStream, Status};
use janus_middleware::HEALTH_SERVICE;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::error::RegistrationError;
use crate::service::ServiceRegistry;

/// Serving status of the health protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ServingStatus {
    /// Status not known yet.
    Unknown = 0,
    /// Accepting calls.
    Serving = 1,
    /// Draining or not started.
    NotServing = 2,
    /// Only used by `Watch` for unknown services.
    ServiceUnknown = 3,
}

impl ServingStatus {
    /// Protocol name, e.g. `SERVING`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Serving => "SERVING",
            Self::NotServing => "NOT_SERVING",
            Self::ServiceUnknown => "SERVICE_UNKNOWN",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        [Self::Unknown, Self::Serving, Self::NotServing, Self::ServiceUnknown]
            .into_iter()
            .find(|status| status.as_str() == name)
    }
}

impl std::fmt::Display for ServingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `grpc.health.v1.HealthCheckRequest`.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct HealthCheckRequest {
    /// Service name; ignored, the aggregate status is returned.
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub service: String,
}

impl Message for HealthCheckRequest {}

/// `grpc.health.v1.HealthCheckResponse`.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    /// A [`ServingStatus`] value.
    #[prost(enumeration = "ServingStatus", tag = "1")]
    #[serde(default, with = "status_name")]
    pub status: i32,
}

impl Message for HealthCheckResponse {}

impl HealthCheckResponse {
    /// Response carrying `status`.
    pub fn new(status: ServingStatus) -> Self {
        Self { status: status as i32 }
    }

    /// Decoded status; unknown numbers map to `Unknown`.
    pub fn serving_status(&self) -> ServingStatus {
        ServingStatus::try_from(self.status).unwrap_or(ServingStatus::Unknown)
    }
}

/// `grpc.health.v1.HealthListRequest`.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct HealthListRequest {}

impl Message for HealthListRequest {}

/// `grpc.health.v1.HealthListResponse`.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct HealthListResponse {
    /// Status per service; the aggregate lives under `""`.
    #[prost(btree_map = "string, message", tag = "1")]
    #[serde(default)]
    pub statuses: BTreeMap<String, HealthCheckResponse>,
}

impl Message for HealthListResponse {}

/// JSON writes the enum by name, as the protobuf JSON mapping does.
mod status_name {
    use super::{Deserialize, Deserializer, Serializer, ServingStatus};

    pub fn serialize<S: Serializer>(value: &i32, serializer: S) -> Result<S::Ok, S::Error> {
        match ServingStatus::try_from(*value) {
            Ok(status) => serializer.serialize_str(status.as_str()),
            Err(_) => serializer.serialize_i32(*value),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum NameOrNumber {
            Name(String),
            Number(i32),
        }

        match NameOrNumber::deserialize(deserializer)? {
            NameOrNumber::Number(n) => Ok(n),
            NameOrNumber::Name(name) => ServingStatus::from_name(&name)
                .map(|status| status as i32)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown serving status {name}"))),
        }
    }
}

/// The server's aggregate health, shared by both listeners.
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    tx: Arc<watch::Sender<ServingStatus>>,
    started_at: Instant,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Creates a registry reporting `NOT_SERVING`.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServingStatus::NotServing);
        Self {
            tx: Arc::new(tx),
            started_at: Instant::now(),
        }
    }

    /// Current status.
    pub fn status(&self) -> ServingStatus {
        *self.tx.borrow()
    }

    /// Whether the status is `SERVING`.
    pub fn is_serving(&self) -> bool {
        self.status() == ServingStatus::Serving
    }

    /// Reports `SERVING`.
    pub fn set_serving(&self) {
        self.set(ServingStatus::Serving);
    }

    /// Reports `NOT_SERVING`.
    pub fn set_not_serving(&self) {
        self.set(ServingStatus::NotServing);
    }

    /// Sets the status, waking watchers if it changed.
    pub fn set(&self, status: ServingStatus) {
        let previous = self.tx.send_replace(status);
        if previous != status {
            tracing::info!(from = %previous, to = %status, "health status changed");
        }
    }

    /// Receiver observing every change.
    pub fn subscribe(&self) -> watch::Receiver<ServingStatus> {
        self.tx.subscribe()
    }

    /// Time since the registry was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Registers `Check`, `Watch` and `List` under `grpc.health.v1.Health`.
    pub fn register(&self, registry: &mut ServiceRegistry) -> Result<(), RegistrationError> {
        let check = self.clone();
        let watcher = self.clone();
        let list = self.clone();

        registry
            .register_unary(HEALTH_SERVICE, "Check", move |_ctx: CallContext, _req: HealthCheckRequest| {
                let status = check.status();
                async move { Ok::<_, Status>(HealthCheckResponse::new(status)) }
            })?
            .register_server_stream(HEALTH_SERVICE, "Watch", move |_ctx: CallContext, _req: HealthCheckRequest| {
                let updates = WatchStream::new(watcher.subscribe())
                    .map(|status| Ok::<_, Status>(HealthCheckResponse::new(status)));
                async move { Ok::<_, Status>(Box::pin(updates) as MessageStream<HealthCheckResponse>) }
            })?
            .register_unary(HEALTH_SERVICE, "List", move |_ctx: CallContext, _req: HealthListRequest| {
                let statuses = BTreeMap::from([(String::new(), HealthCheckResponse::new(list.status()))]);
                async move { Ok::<_, Status>(HealthListResponse { statuses }) }
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;
    use janus_core::{downcast, CallKind, CallMeta, Protocol};
    use janus_middleware::{CallRequest, Payload};

    fn call(method: &str, kind: CallKind, input: janus_core::BoxMessage) -> CallRequest {
        let meta = Arc::new(CallMeta::server(HEALTH_SERVICE, method, kind));
        CallRequest::new(CallContext::new(meta, Protocol::Grpc, HeaderMap::new()), Payload::Unary(input))
    }

    #[test]
    fn test_status_transitions() {
        let health = HealthRegistry::new();
        let rx = health.subscribe();
        health.set_serving();
        assert!(health.is_serving());
        assert!(rx.has_changed().unwrap());
        health.set_not_serving();
        assert_eq!(*rx.borrow(), ServingStatus::NotServing);
    }

    #[test]
    fn test_response_json_uses_names() {
        let json = serde_json::to_value(HealthCheckResponse::new(ServingStatus::NotServing)).unwrap();
        assert_eq!(json, serde_json::json!({"status": "NOT_SERVING"}));

        let parsed: HealthCheckResponse = serde_json::from_value(serde_json::json!({"status": "SERVING"})).unwrap();
        assert_eq!(parsed.serving_status(), ServingStatus::Serving);
        let parsed: HealthCheckResponse = serde_json::from_value(serde_json::json!({"status": 2})).unwrap();
        assert_eq!(parsed.serving_status(), ServingStatus::NotServing);
    }

    #[tokio::test]
    async fn test_check_ignores_service_name() {
        let health = HealthRegistry::new();
        let mut registry = ServiceRegistry::new();
        health.register(&mut registry).unwrap();
        health.set_serving();

        let entry = registry.get("/grpc.health.v1.Health/Check").unwrap();
        let input = Box::new(HealthCheckRequest {
            service: "no.Such".to_string(),
        });
        let response = (entry.handler)(call("Check", CallKind::Unary, input)).await.unwrap();
        let out = downcast::<HealthCheckResponse>(response.payload.into_unary().unwrap()).unwrap();
        assert_eq!(out.serving_status(), ServingStatus::Serving);
    }

    #[tokio::test]
    async fn test_watch_streams_changes() {
        let health = HealthRegistry::new();
        let mut registry = ServiceRegistry::new();
        health.register(&mut registry).unwrap();

        let entry = registry.get("/grpc.health.v1.Health/Watch").unwrap();
        let input = Box::new(HealthCheckRequest::default());
        let response = (entry.handler)(call("Watch", CallKind::ServerStream, input)).await.unwrap();
        let mut updates = response.payload.into_stream();

        let first = downcast::<HealthCheckResponse>(updates.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.serving_status(), ServingStatus::NotServing);

        health.set_serving();
        let second = downcast::<HealthCheckResponse>(updates.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(second.serving_status(), ServingStatus::Serving);
    }

    #[tokio::test]
    async fn test_list() {
        let health = HealthRegistry::new();
        let mut registry = ServiceRegistry::new();
        health.register(&mut registry).unwrap();

        let entry = registry.get("/grpc.health.v1.Health/List").unwrap();
        let response = (entry.handler)(call("List", CallKind::Unary, Box::new(HealthListRequest {})))
            .await
            .unwrap();
        let out = downcast::<HealthListResponse>(response.payload.into_unary().unwrap()).unwrap();
        assert_eq!(out.statuses[""].serving_status(), ServingStatus::NotServing);
    }
}
