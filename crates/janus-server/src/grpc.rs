//! gRPC front end.
//!
//! Requests are routed by path to a [`MethodEntry`] and handed to
//! `tonic::server::Grpc` with a [`DynCodec`] carrying the method's decoder,
//! so tonic does the framing and status trailers while the call itself
//! runs through the shared pipeline.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use http::{HeaderMap, HeaderValue};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use janus_core::{BoxMessage, BoxMessageStream, CallContext, CallKind, Protocol, REQUEST_ID_HEADER};
use janus_middleware::{BoxFuture, Payload, Pipeline};
use tonic::metadata::MetadataMap;
use tonic::server::{ClientStreamingService, ServerStreamingService, StreamingService, UnaryService};
use tonic::Streaming;

use crate::codec::{from_grpc_status, to_grpc_status, DynCodec};
use crate::dispatch::{call_timeout, dispatch};
use crate::memory::Conn;
use crate::service::{MethodEntry, MethodTable};
use crate::shutdown::{drive_connection, ConnectionSignals};

type GrpcStream = Pin<Box<dyn Stream<Item = Result<BoxMessage, tonic::Status>> + Send + 'static>>;
type GrpcFuture<T> = BoxFuture<'static, Result<tonic::Response<T>, tonic::Status>>;

/// Serves the method table over gRPC.
#[derive(Debug, Clone)]
pub struct GrpcService {
    table: MethodTable,
    pipeline: Pipeline,
}

impl GrpcService {
    /// Serves `table` through `pipeline`.
    pub fn new(table: MethodTable, pipeline: Pipeline) -> Self {
        Self { table, pipeline }
    }

    /// Handles one gRPC request.
    pub async fn handle(&self, request: http::Request<Incoming>, peer: Option<SocketAddr>) -> http::Response<tonic::body::Body> {
        let Some(entry) = self.table.get(request.uri().path()) else {
            tracing::debug!(path = request.uri().path(), "unknown grpc method");
            return tonic::Status::unimplemented(format!("unknown method {}", request.uri().path())).into_http();
        };

        let method = MethodService {
            entry: Arc::clone(entry),
            pipeline: self.pipeline.clone(),
            peer,
        };
        let mut grpc = tonic::server::Grpc::new(DynCodec::new(entry.decode_protobuf));
        match entry.desc.kind {
            CallKind::Unary => grpc.unary(method, request).await,
            CallKind::ServerStream => grpc.server_streaming(method, request).await,
            CallKind::ClientStream => grpc.client_streaming(method, request).await,
            CallKind::BidiStream => grpc.streaming(method, request).await,
        }
    }

    /// Serves HTTP/2 on one accepted connection until it closes.
    pub async fn serve_connection(self: Arc<Self>, conn: Conn, peer: Option<SocketAddr>, signals: ConnectionSignals) {
        let service = hyper::service::service_fn(move |request: http::Request<Incoming>| {
            let grpc = Arc::clone(&self);
            async move { Ok::<_, Infallible>(grpc.handle(request, peer).await) }
        });
        let conn = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
            .serve_connection(TokioIo::new(conn), service);
        drive_connection(conn, "grpc", signals).await;
    }
}

/// One registered method as a tonic service of every shape.
#[derive(Clone)]
struct MethodService {
    entry: Arc<MethodEntry>,
    pipeline: Pipeline,
    peer: Option<SocketAddr>,
}

impl MethodService {
    async fn run(self, metadata: MetadataMap, payload: Payload) -> Result<(Payload, MetadataMap), tonic::Status> {
        let headers = metadata.into_headers();
        let timeout = call_timeout(&headers);
        let ctx = CallContext::new(Arc::clone(&self.entry.meta), Protocol::Grpc, headers)
            .with_peer(self.peer)
            .with_timeout(timeout);
        let response_metadata = ctx.response_metadata().clone();
        let request_id = ctx.request_id().clone();

        let result = dispatch(&self.pipeline, &self.entry, ctx, payload).await;

        let mut headers = response_metadata.headers();
        headers.extend(response_metadata.trailers());
        if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        match result {
            Ok(response) => Ok((response.payload, MetadataMap::from_headers(headers))),
            Err(status) => Err(to_grpc_status(&status, headers)),
        }
    }
}

fn incoming(stream: Streaming<BoxMessage>) -> BoxMessageStream {
    Box::pin(stream.map(|item| item.map_err(|status| from_grpc_status(&status))))
}

fn outgoing(stream: BoxMessageStream) -> GrpcStream {
    Box::pin(stream.map(|item| item.map_err(|status| to_grpc_status(&status, HeaderMap::new()))))
}

fn single(payload: Payload) -> Result<BoxMessage, tonic::Status> {
    payload
        .into_unary()
        .map_err(|status| to_grpc_status(&status, HeaderMap::new()))
}

impl UnaryService<BoxMessage> for MethodService {
    type Response = BoxMessage;
    type Future = GrpcFuture<BoxMessage>;

    fn call(&mut self, request: tonic::Request<BoxMessage>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move {
            let (metadata, extensions, message) = request.into_parts();
            let (payload, metadata) = service.run(metadata, Payload::Unary(message)).await?;
            Ok(tonic::Response::from_parts(metadata, single(payload)?, extensions))
        })
    }
}

impl ServerStreamingService<BoxMessage> for MethodService {
    type Response = BoxMessage;
    type ResponseStream = GrpcStream;
    type Future = GrpcFuture<GrpcStream>;

    fn call(&mut self, request: tonic::Request<BoxMessage>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move {
            let (metadata, extensions, message) = request.into_parts();
            let (payload, metadata) = service.run(metadata, Payload::Unary(message)).await?;
            Ok(tonic::Response::from_parts(metadata, outgoing(payload.into_stream()), extensions))
        })
    }
}

impl ClientStreamingService<BoxMessage> for MethodService {
    type Response = BoxMessage;
    type Future = GrpcFuture<BoxMessage>;

    fn call(&mut self, request: tonic::Request<Streaming<BoxMessage>>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move {
            let (metadata, extensions, stream) = request.into_parts();
            let (payload, metadata) = service.run(metadata, Payload::Stream(incoming(stream))).await?;
            Ok(tonic::Response::from_parts(metadata, single(payload)?, extensions))
        })
    }
}

impl StreamingService<BoxMessage> for MethodService {
    type Response = BoxMessage;
    type ResponseStream = GrpcStream;
    type Future = GrpcFuture<GrpcStream>;

    fn call(&mut self, request: tonic::Request<Streaming<BoxMessage>>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move {
            let (metadata, extensions, stream) = request.into_parts();
            let (payload, metadata) = service.run(metadata, Payload::Stream(incoming(stream))).await?;
            Ok(tonic::Response::from_parts(metadata, outgoing(payload.into_stream()), extensions))
        })
    }
}
