//! The values flowing through an interceptor chain.

use std::fmt;

use janus_core::{BoxMessage, BoxMessageStream, CallContext, Status};

/// Result of a call.
pub type CallResult = Result<CallResponse, Status>;

/// A call payload: one message, or a stream of messages.
pub enum Payload {
    /// A single message.
    Unary(BoxMessage),
    /// A stream of messages terminated by end-of-stream or an error.
    Stream(BoxMessageStream),
}

impl Payload {
    /// Whether this is a stream.
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Returns the single message, or `Internal` for a stream.
    pub fn into_unary(self) -> Result<BoxMessage, Status> {
        match self {
            Self::Unary(message) => Ok(message),
            Self::Stream(_) => Err(Status::internal("expected a single message, got a stream")),
        }
    }

    /// Returns the stream, lifting a single message into a one-item stream.
    pub fn into_stream(self) -> BoxMessageStream {
        match self {
            Self::Unary(message) => Box::pin(futures_util::stream::once(async move { Ok::<_, Status>(message) })),
            Self::Stream(stream) => stream,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary(message) => f.debug_tuple("Unary").field(message).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A call entering the chain.
#[derive(Debug)]
pub struct CallRequest {
    /// Per-call context.
    pub ctx: CallContext,
    /// Input payload.
    pub payload: Payload,
}

impl CallRequest {
    /// Creates a call request.
    pub fn new(ctx: CallContext, payload: Payload) -> Self {
        Self { ctx, payload }
    }
}

/// A call's successful outcome.
#[derive(Debug)]
pub struct CallResponse {
    /// Output payload.
    pub payload: Payload,
}

impl CallResponse {
    /// Creates a response.
    pub fn new(payload: Payload) -> Self {
        Self { payload }
    }

    /// A single-message response.
    pub fn unary(message: BoxMessage) -> Self {
        Self::new(Payload::Unary(message))
    }

    /// A streaming response.
    pub fn stream(stream: BoxMessageStream) -> Self {
        Self::new(Payload::Stream(stream))
    }
}
