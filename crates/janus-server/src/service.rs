//! Typed method registration.
//!
//! Each `register_*` call fixes the handler shape and erases it into a
//! [`MethodEntry`]: one [`CallHandler`] plus protobuf and JSON decode
//! function pointers. The resulting table is built once and shared by the
//! gRPC listener and the HTTP bridge.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::{StreamExt, TryStreamExt};
use janus_core::{
    downcast, BoxMessage, CallContext, CallKind, CallMeta, Message, MessageStream, Status,
};
use janus_middleware::{BoxFuture, CallHandler, CallRequest, CallResponse, CallResult};
use serde::Serialize;
use serde_json::Value;

use crate::codec::{decode_protobuf, DecodeFn};
use crate::error::RegistrationError;
use crate::marshal::JsonMarshaler;

/// Decodes a JSON value (either field naming) into an erased message.
pub type JsonDecodeFn = fn(Value) -> Result<BoxMessage, Status>;

fn decode_json<T: Message>(value: Value) -> Result<BoxMessage, Status> {
    JsonMarshaler::from_value::<T>(value).map(|message| Box::new(message) as BoxMessage)
}

/// Public description of a registered method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodDesc {
    /// `/package.Service/Method`.
    pub full_method: String,
    /// `package.Service`.
    pub service: String,
    /// `Method`.
    pub method: String,
    /// Call shape.
    #[serde(serialize_with = "serialize_kind")]
    pub kind: CallKind,
    /// Rust type of the input message.
    pub input_type: &'static str,
    /// Rust type of the output message.
    pub output_type: &'static str,
}

fn serialize_kind<S: serde::Serializer>(kind: &CallKind, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(kind.as_str())
}

/// A registered method with its erased handler and codecs.
pub struct MethodEntry {
    /// Descriptor.
    pub desc: MethodDesc,
    /// Shared call descriptor handed to every call context.
    pub meta: Arc<CallMeta>,
    /// Erased handler run at the end of the pipeline.
    pub handler: CallHandler,
    /// Protobuf decoder for the input type.
    pub decode_protobuf: DecodeFn,
    /// JSON decoder for the input type.
    pub decode_json: JsonDecodeFn,
}

impl std::fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodEntry").field("desc", &self.desc).finish_non_exhaustive()
    }
}

/// Immutable lookup table from full method name to entry.
pub type MethodTable = Arc<BTreeMap<String, Arc<MethodEntry>>>;

/// Collects typed method registrations.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    methods: BTreeMap<String, Arc<MethodEntry>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a unary method.
    pub fn register_unary<Req, Resp, F, Fut>(
        &mut self,
        service: &str,
        method: &str,
        handler: F,
    ) -> Result<&mut Self, RegistrationError>
    where
        Req: Message,
        Resp: Message,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: CallHandler = Arc::new(move |request: CallRequest| -> BoxFuture<'static, CallResult> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let input = downcast::<Req>(request.payload.into_unary()?)?;
                let output = handler(request.ctx, input).await?;
                Ok(CallResponse::unary(Box::new(output)))
            })
        });
        self.insert::<Req, Resp>(service, method, CallKind::Unary, erased)
    }

    /// Registers a server-streaming method.
    pub fn register_server_stream<Req, Resp, F, Fut>(
        &mut self,
        service: &str,
        method: &str,
        handler: F,
    ) -> Result<&mut Self, RegistrationError>
    where
        Req: Message,
        Resp: Message,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MessageStream<Resp>, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: CallHandler = Arc::new(move |request: CallRequest| -> BoxFuture<'static, CallResult> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let input = downcast::<Req>(request.payload.into_unary()?)?;
                let output = handler(request.ctx, input).await?;
                Ok(CallResponse::stream(erase_stream(output)))
            })
        });
        self.insert::<Req, Resp>(service, method, CallKind::ServerStream, erased)
    }

    /// Registers a client-streaming method.
    pub fn register_client_stream<Req, Resp, F, Fut>(
        &mut self,
        service: &str,
        method: &str,
        handler: F,
    ) -> Result<&mut Self, RegistrationError>
    where
        Req: Message,
        Resp: Message,
        F: Fn(CallContext, MessageStream<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: CallHandler = Arc::new(move |request: CallRequest| -> BoxFuture<'static, CallResult> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let input = typed_stream::<Req>(request.payload.into_stream());
                let output = handler(request.ctx, input).await?;
                Ok(CallResponse::unary(Box::new(output)))
            })
        });
        self.insert::<Req, Resp>(service, method, CallKind::ClientStream, erased)
    }

    /// Registers a bidirectional-streaming method.
    pub fn register_bidi<Req, Resp, F, Fut>(
        &mut self,
        service: &str,
        method: &str,
        handler: F,
    ) -> Result<&mut Self, RegistrationError>
    where
        Req: Message,
        Resp: Message,
        F: Fn(CallContext, MessageStream<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MessageStream<Resp>, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: CallHandler = Arc::new(move |request: CallRequest| -> BoxFuture<'static, CallResult> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let input = typed_stream::<Req>(request.payload.into_stream());
                let output = handler(request.ctx, input).await?;
                Ok(CallResponse::stream(erase_stream(output)))
            })
        });
        self.insert::<Req, Resp>(service, method, CallKind::BidiStream, erased)
    }

    /// Looks up a method by full name.
    pub fn get(&self, full_method: &str) -> Option<&Arc<MethodEntry>> {
        self.methods.get(full_method)
    }

    /// Whether `full_method` is registered.
    pub fn contains(&self, full_method: &str) -> bool {
        self.methods.contains_key(full_method)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no method is registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Descriptors in full-name order.
    pub fn descriptors(&self) -> impl Iterator<Item = &MethodDesc> {
        self.methods.values().map(|entry| &entry.desc)
    }

    /// Freezes the registry into a shared table.
    pub fn into_table(self) -> MethodTable {
        Arc::new(self.methods)
    }

    fn insert<Req: Message, Resp: Message>(
        &mut self,
        service: &str,
        method: &str,
        kind: CallKind,
        handler: CallHandler,
    ) -> Result<&mut Self, RegistrationError> {
        for name in [service, method] {
            if name.is_empty() || name.contains('/') {
                return Err(RegistrationError::InvalidName(name.to_string()));
            }
        }
        let meta = Arc::new(CallMeta::server(service, method, kind));
        let full_method = meta.full_method();
        if self.methods.contains_key(&full_method) {
            return Err(RegistrationError::DuplicateMethod(full_method));
        }

        let entry = MethodEntry {
            desc: MethodDesc {
                full_method: full_method.clone(),
                service: service.to_string(),
                method: method.to_string(),
                kind,
                input_type: std::any::type_name::<Req>(),
                output_type: std::any::type_name::<Resp>(),
            },
            meta,
            handler,
            decode_protobuf: decode_protobuf::<Req>,
            decode_json: decode_json::<Req>,
        };
        tracing::debug!(method = %full_method, kind = %kind, "registered method");
        self.methods.insert(full_method, Arc::new(entry));
        Ok(self)
    }
}

fn erase_stream<T: Message>(stream: MessageStream<T>) -> janus_core::BoxMessageStream {
    Box::pin(stream.map_ok(|message| Box::new(message) as BoxMessage))
}

fn typed_stream<T: Message>(stream: janus_core::BoxMessageStream) -> MessageStream<T> {
    Box::pin(stream.map(|item| item.and_then(downcast::<T>)))
}
