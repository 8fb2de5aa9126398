//! Message types shared by both wire protocols.
//!
//! A gateway message is a protobuf message that also round-trips through
//! serde, so the same value can be sent as binary RPC or as JSON. The
//! pipeline sees messages type-erased as [`BoxMessage`].

use std::any::Any;
use std::fmt;
use std::pin::Pin;

use futures_util::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::status::Status;

/// A message usable on both protocols.
///
/// Implementors derive `prost::Message`, `Serialize` and `Deserialize`, and
/// may override [`validate`](Message::validate) to reject malformed input
/// before the handler runs.
///
/// # Example
///
/// ```
/// use janus_core::{Message, Status};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
/// struct EchoRequest {
///     #[prost(string, tag = "1")]
///     #[serde(default)]
///     text: String,
/// }
///
/// impl Message for EchoRequest {
///     fn validate(&self) -> Result<(), Status> {
///         if self.text.is_empty() {
///             return Err(Status::invalid_argument("text is required"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Message:
    prost::Message + fmt::Debug + Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static
{
    /// Checks field-level constraints.
    fn validate(&self) -> Result<(), Status> {
        Ok(())
    }
}

/// Object-safe view of a [`Message`].
pub trait DynMessage: fmt::Debug + Send + Sync + 'static {
    /// Serializes to a JSON value with the message's own (snake case) field names.
    fn to_json_value(&self) -> Result<Value, serde_json::Error>;

    /// Like [`to_json_value`](DynMessage::to_json_value), with byte-valued
    /// fields left out at any depth.
    fn to_json_value_without_bytes(&self) -> Result<Value, serde_json::Error>;

    /// Encodes to protobuf bytes.
    fn encode_protobuf(&self) -> Vec<u8>;

    /// Runs [`Message::validate`].
    fn validate(&self) -> Result<(), Status>;

    /// Rust type name, for diagnostics.
    fn type_name(&self) -> &'static str;

    /// Borrowed `Any` view.
    fn as_any(&self) -> &dyn Any;

    /// Owned `Any` view.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Message> DynMessage for T {
    fn to_json_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn to_json_value_without_bytes(&self) -> Result<Value, serde_json::Error> {
        crate::scrub::to_value_without_bytes(self)
    }

    fn encode_protobuf(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    fn validate(&self) -> Result<(), Status> {
        Message::validate(self)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// A type-erased message.
pub type BoxMessage = Box<dyn DynMessage>;

/// A stream of messages or a terminating status.
pub type MessageStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// A stream of type-erased messages.
pub type BoxMessageStream = MessageStream<BoxMessage>;

/// Recovers the concrete type of an erased message.
pub fn downcast<T: Message>(message: BoxMessage) -> Result<T, Status> {
    let type_name = message.type_name();
    message.into_any().downcast::<T>().map(|m| *m).map_err(|_| {
        Status::internal(format!(
            "message type mismatch: expected {}, got {type_name}",
            std::any::type_name::<T>()
        ))
    })
}

/// Borrows the concrete type of an erased message.
pub fn downcast_ref<T: Message>(message: &dyn DynMessage) -> Option<&T> {
    message.as_any().downcast_ref::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    struct Ping {
        #[prost(string, tag = "1")]
        #[serde(default)]
        payload: String,
        #[prost(int32, tag = "2")]
        #[serde(default)]
        count: i32,
    }

    impl Message for Ping {
        fn validate(&self) -> Result<(), Status> {
            if self.count < 0 {
                return Err(Status::invalid_argument("count must be positive"));
            }
            Ok(())
        }
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    struct Pong {
        #[prost(string, tag = "1")]
        #[serde(default)]
        payload: String,
    }

    impl Message for Pong {}

    #[test]
    fn test_erased_message_json_and_protobuf() {
        let ping = Ping {
            payload: "hi".into(),
            count: 2,
        };
        let erased: BoxMessage = Box::new(ping.clone());

        let json = erased.to_json_value().unwrap();
        assert_eq!(json["payload"], "hi");
        assert_eq!(json["count"], 2);

        let decoded = <Ping as prost::Message>::decode(erased.encode_protobuf().as_slice()).unwrap();
        assert_eq!(decoded, ping);
    }

    #[test]
    fn test_validate_through_erasure() {
        let erased: BoxMessage = Box::new(Ping {
            payload: String::new(),
            count: -1,
        });
        assert!(erased.validate().is_err());

        let ok: BoxMessage = Box::new(Pong::default());
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_downcast() {
        let erased: BoxMessage = Box::new(Pong {
            payload: "back".into(),
        });
        assert_eq!(downcast_ref::<Pong>(erased.as_ref()).unwrap().payload, "back");
        assert!(downcast_ref::<Ping>(erased.as_ref()).is_none());

        let err = downcast::<Ping>(erased).unwrap_err();
        assert_eq!(err.code(), crate::Code::INTERNAL);
    }
}
