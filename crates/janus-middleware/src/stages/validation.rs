//! Input validation stage.
//!
//! Runs [`Message::validate`](janus_core::Message::validate) on the unary
//! input before the rest of the chain, and on every message of an input
//! stream as the handler reads it. A failure surfaces as
//! `InvalidArgument`; a handler never sees an invalid message.

use janus_core::{Code, Status};

use crate::call::{CallRequest, CallResult, Payload};
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::observe::ObservedStream;

/// Validation interceptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationInterceptor;

impl ValidationInterceptor {
    /// Creates the validation stage.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn as_invalid_argument(status: Status) -> Status {
    if status.code() == Code::INVALID_ARGUMENT {
        status
    } else {
        Status::invalid_argument(status.message()).with_details(status.details().to_vec())
    }
}

impl Interceptor for ValidationInterceptor {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn intercept<'a>(&'a self, mut request: CallRequest, next: Next<'a>) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            request.payload = match request.payload {
                Payload::Unary(message) => {
                    message.validate().map_err(as_invalid_argument)?;
                    Payload::Unary(message)
                }
                Payload::Stream(stream) => Payload::Stream(
                    ObservedStream::new(stream)
                        .on_item(|message| message.validate().map_err(as_invalid_argument))
                        .boxed(),
                ),
            };
            next.run(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallResponse;
    use crate::interceptor::{BoxedInterceptor, CallHandler};
    use futures_util::StreamExt;
    use janus_core::{BoxMessage, CallContext, CallKind, CallMeta, Protocol};
    use std::sync::Arc;

    #[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
    struct Signup {
        #[prost(string, tag = "1")]
        #[serde(default)]
        email: String,
    }

    impl janus_core::Message for Signup {
        fn validate(&self) -> Result<(), Status> {
            if self.email.contains('@') {
                Ok(())
            } else {
                Err(Status::failed_precondition("email must contain @"))
            }
        }
    }

    fn signup(email: &str) -> BoxMessage {
        Box::new(Signup { email: email.into() })
    }

    fn ctx(kind: CallKind) -> CallContext {
        let meta = Arc::new(CallMeta::server("demo.Accounts", "Signup", kind));
        CallContext::new(meta, Protocol::Grpc, http::HeaderMap::new())
    }

    fn counting_handler() -> CallHandler {
        Arc::new(|request: CallRequest| -> BoxFuture<'static, CallResult> {
            Box::pin(async move {
                match request.payload {
                    Payload::Unary(message) => Ok(CallResponse::unary(message)),
                    Payload::Stream(stream) => {
                        let results: Vec<_> = stream.collect().await;
                        if let Some(Err(status)) = results.into_iter().find(Result::is_err) {
                            return Err(status);
                        }
                        Ok(CallResponse::unary(signup("done@x")))
                    }
                }
            })
        })
    }

    #[tokio::test]
    async fn test_invalid_unary_never_reaches_handler() {
        let chain: Vec<BoxedInterceptor> = vec![Arc::new(ValidationInterceptor::new())];
        let handler = counting_handler();
        let err = Next::new(&chain, &handler)
            .run(CallRequest::new(ctx(CallKind::Unary), Payload::Unary(signup("nope"))))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::INVALID_ARGUMENT);
        assert_eq!(err.message(), "email must contain @");
    }

    #[tokio::test]
    async fn test_valid_unary_passes() {
        let chain: Vec<BoxedInterceptor> = vec![Arc::new(ValidationInterceptor::new())];
        let handler = counting_handler();
        let response = Next::new(&chain, &handler)
            .run(CallRequest::new(ctx(CallKind::Unary), Payload::Unary(signup("a@b"))))
            .await;
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn test_stream_messages_validated() {
        let chain: Vec<BoxedInterceptor> = vec![Arc::new(ValidationInterceptor::new())];
        let handler = counting_handler();
        let input = futures_util::stream::iter(vec![Ok::<_, Status>(signup("a@b")), Ok(signup("bad"))]);
        let err = Next::new(&chain, &handler)
            .run(CallRequest::new(
                ctx(CallKind::ClientStream),
                Payload::Stream(Box::pin(input)),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::INVALID_ARGUMENT);
    }
}
