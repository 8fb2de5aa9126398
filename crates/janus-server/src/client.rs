//! Typed gRPC client over erased messages.
//!
//! Used for self-calls through the memory transport and for tests; any
//! `tonic` [`Channel`] works.

use futures_util::StreamExt;
use http::uri::PathAndQuery;
use http::HeaderMap;
use janus_core::{downcast, BoxMessage, Message, MessageStream, Status};
use tonic::metadata::MetadataMap;
use tonic::transport::Channel;

use crate::codec::{from_grpc_status, DynCodec};
use crate::health::{HealthCheckRequest, HealthCheckResponse, ServingStatus};

/// gRPC client calling methods by full path.
#[derive(Debug, Clone)]
pub struct Client {
    grpc: tonic::client::Grpc<Channel>,
}

impl Client {
    /// Client over `channel`.
    pub fn new(channel: Channel) -> Self {
        Self {
            grpc: tonic::client::Grpc::new(channel),
        }
    }

    fn path(path: &str) -> Result<PathAndQuery, Status> {
        PathAndQuery::try_from(path).map_err(|e| Status::invalid_argument(format!("invalid method path {path}: {e}")))
    }

    async fn ready(&mut self) -> Result<(), Status> {
        self.grpc
            .ready()
            .await
            .map_err(|e| Status::unavailable(format!("channel not ready: {e}")))
    }

    fn request<Req: Message>(input: Req, metadata: HeaderMap) -> tonic::Request<BoxMessage> {
        let mut request = tonic::Request::new(Box::new(input) as BoxMessage);
        *request.metadata_mut() = MetadataMap::from_headers(metadata);
        request
    }

    /// Calls a unary method, e.g. `/grpc.health.v1.Health/Check`.
    ///
    /// # Errors
    ///
    /// The status returned by the server, or `Unavailable` when the
    /// channel cannot connect.
    pub async fn unary<Req: Message, Resp: Message>(
        &mut self,
        path: &str,
        input: Req,
        metadata: HeaderMap,
    ) -> Result<Resp, Status> {
        let path = Self::path(path)?;
        self.ready().await?;
        let response = self
            .grpc
            .unary(Self::request(input, metadata), path, DynCodec::of::<Resp>())
            .await
            .map_err(|status| from_grpc_status(&status))?;
        downcast::<Resp>(response.into_inner())
    }

    /// Calls a server-streaming method.
    ///
    /// # Errors
    ///
    /// The status returned before the first message, or `Unavailable`
    /// when the channel cannot connect.
    pub async fn server_stream<Req: Message, Resp: Message>(
        &mut self,
        path: &str,
        input: Req,
        metadata: HeaderMap,
    ) -> Result<MessageStream<Resp>, Status> {
        let path = Self::path(path)?;
        self.ready().await?;
        let response = self
            .grpc
            .server_streaming(Self::request(input, metadata), path, DynCodec::of::<Resp>())
            .await
            .map_err(|status| from_grpc_status(&status))?;
        let stream = response.into_inner().map(|item| match item {
            Ok(message) => downcast::<Resp>(message),
            Err(status) => Err(from_grpc_status(&status)),
        });
        Ok(Box::pin(stream))
    }

    /// Aggregate health of the server behind the channel.
    ///
    /// # Errors
    ///
    /// Any call failure.
    pub async fn check_health(&mut self) -> Result<ServingStatus, Status> {
        let response: HealthCheckResponse = self
            .unary(
                "/grpc.health.v1.Health/Check",
                HealthCheckRequest::default(),
                HeaderMap::new(),
            )
            .await?;
        Ok(response.serving_status())
    }
}
