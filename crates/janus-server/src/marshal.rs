//! JSON marshaling shared by the bridge and the native JSON surfaces.
//!
//! Messages serialize with their own snake_case field names; the marshaler
//! renames keys to camelCase when configured and strips fields holding
//! default values unless `emit_defaults` is on. Decoding accepts both
//! namings.

use janus_core::{DynMessage, FieldNaming, Message, Status};
use serde_json::{Map, Value};

/// Encodes and decodes messages as JSON with a fixed field naming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonMarshaler {
    naming: FieldNaming,
    emit_defaults: bool,
}

impl JsonMarshaler {
    /// Creates a marshaler.
    pub const fn new(naming: FieldNaming, emit_defaults: bool) -> Self {
        Self { naming, emit_defaults }
    }

    /// Field naming used for output and error bodies.
    pub const fn naming(&self) -> FieldNaming {
        self.naming
    }

    /// Whether default-valued fields are written.
    pub const fn emit_defaults(&self) -> bool {
        self.emit_defaults
    }

    /// Converts a message to its wire JSON value.
    pub fn to_value(&self, message: &dyn DynMessage) -> Result<Value, Status> {
        let mut value = message
            .to_json_value()
            .map_err(|e| Status::internal(format!("failed to marshal {}: {e}", message.type_name())))?;
        if !self.emit_defaults {
            strip_defaults(&mut value);
        }
        if self.naming == FieldNaming::CamelCase {
            value = rename_keys(value, &to_camel_case);
        }
        Ok(value)
    }

    /// Marshals a message to JSON bytes.
    ///
    /// ```
    /// use janus_core::FieldNaming;
    /// use janus_server::JsonMarshaler;
    /// use serde::{Deserialize, Serialize};
    ///
    /// #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    /// struct Reply {
    ///     #[prost(string, tag = "1")]
    ///     #[serde(default)]
    ///     reply_text: String,
    ///     #[prost(int64, tag = "2")]
    ///     #[serde(default)]
    ///     sent_at: i64,
    /// }
    /// impl janus_core::Message for Reply {}
    ///
    /// let reply = Reply { reply_text: "hi".to_string(), sent_at: 0 };
    /// let camel = JsonMarshaler::new(FieldNaming::CamelCase, false);
    /// assert_eq!(camel.marshal(&reply).unwrap(), br#"{"replyText":"hi"}"#);
    /// ```
    pub fn marshal(&self, message: &dyn DynMessage) -> Result<Vec<u8>, Status> {
        let value = self.to_value(message)?;
        serde_json::to_vec(&value).map_err(|e| Status::internal(format!("failed to marshal: {e}")))
    }

    /// Decodes a message; an empty body yields the default message.
    pub fn unmarshal<T: Message>(&self, bytes: &[u8]) -> Result<T, Status> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| Status::invalid_argument(format!("invalid JSON body: {e}")))?;
        Self::from_value(value)
    }

    /// Decodes a message from a parsed JSON value in either naming.
    pub fn from_value<T: Message>(value: Value) -> Result<T, Status> {
        if value.is_null() {
            return Ok(T::default());
        }
        let value = rename_keys(value, &to_snake_case);
        serde_json::from_value(value)
            .map_err(|e| Status::invalid_argument(format!("invalid request message: {e}")))
    }
}

fn rename_keys(value: Value, rename: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .into_iter()
                .map(|(key, value)| (rename(&key), rename_keys(value, rename)))
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| rename_keys(v, rename)).collect()),
        other => other,
    }
}

fn strip_defaults(value: &mut Value) {
    match value {
        Value::Object(object) => {
            for nested in object.values_mut() {
                strip_defaults(nested);
            }
            object.retain(|_, v| !is_default(v));
        }
        Value::Array(items) => items.iter_mut().for_each(strip_defaults),
        _ => {}
    }
}

fn is_default(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        // nested messages are kept even when all their fields were stripped
        Value::Object(_) => false,
    }
}

pub(crate) fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

pub(crate) fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    struct Inner {
        #[prost(string, tag = "1")]
        #[serde(default)]
        display_name: String,
    }

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    struct Outer {
        #[prost(string, tag = "1")]
        #[serde(default)]
        user_id: String,
        #[prost(int32, tag = "2")]
        #[serde(default)]
        retry_count: i32,
        #[prost(bool, tag = "3")]
        #[serde(default)]
        is_admin: bool,
        #[prost(message, optional, tag = "4")]
        #[serde(default)]
        profile: Option<Inner>,
        #[prost(string, repeated, tag = "5")]
        #[serde(default)]
        tags: Vec<String>,
    }

    impl Message for Outer {}

    fn sample() -> Outer {
        Outer {
            user_id: "u-1".to_string(),
            retry_count: 0,
            is_admin: false,
            profile: Some(Inner {
                display_name: "Ada".to_string(),
            }),
            tags: vec![],
        }
    }

    #[test]
    fn test_snake_case_strips_defaults() {
        let json = JsonMarshaler::default().marshal(&sample()).unwrap();
        let value: Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"user_id": "u-1", "profile": {"display_name": "Ada"}})
        );
    }

    #[test]
    fn test_camel_case_with_defaults() {
        let marshaler = JsonMarshaler::new(FieldNaming::CamelCase, true);
        let value = marshaler.to_value(&sample()).unwrap();
        assert_eq!(value["userId"], "u-1");
        assert_eq!(value["retryCount"], 0);
        assert_eq!(value["isAdmin"], false);
        assert_eq!(value["profile"]["displayName"], "Ada");
        assert_eq!(value["tags"], serde_json::json!([]));
    }

    #[test]
    fn test_unmarshal_accepts_both_namings() {
        let marshaler = JsonMarshaler::default();
        let camel: Outer = marshaler
            .unmarshal(br#"{"userId": "u-2", "retryCount": 3, "profile": {"displayName": "Bo"}}"#)
            .unwrap();
        let snake: Outer = marshaler
            .unmarshal(br#"{"user_id": "u-2", "retry_count": 3, "profile": {"display_name": "Bo"}}"#)
            .unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.retry_count, 3);
    }

    #[test]
    fn test_unmarshal_empty_body() {
        let message: Outer = JsonMarshaler::default().unmarshal(b"  \n").unwrap();
        assert_eq!(message, Outer::default());
    }

    #[test]
    fn test_unmarshal_invalid_json() {
        let err = JsonMarshaler::default().unmarshal::<Outer>(b"{nope").unwrap_err();
        assert_eq!(err.code(), janus_core::Code::INVALID_ARGUMENT);
    }

    #[test]
    fn test_case_conversion() {
        assert_eq!(to_camel_case("error_description"), "errorDescription");
        assert_eq!(to_camel_case("plain"), "plain");
        assert_eq!(to_snake_case("errorDescription"), "error_description");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }
}
