//! Message bodies rendered for call logs.

use std::collections::HashSet;

use janus_core::DynMessage;
use serde_json::Value;

/// Longest body written to a log record, in bytes.
pub const MAX_LOGGED_BODY: usize = 2048;

/// Renders messages as compact JSON for logging.
///
/// String values of masked fields become `"*"`. When the call's decision
/// asks for data clearing, byte-valued fields and elided fields are
/// removed. All of this applies at any nesting depth, including inside
/// arrays.
#[derive(Debug, Clone, Default)]
pub struct BodyEncoder {
    mask: HashSet<String>,
    elide: HashSet<String>,
}

impl BodyEncoder {
    /// Creates an encoder that masks and elides nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fields whose string values are replaced by `"*"`.
    #[must_use]
    pub fn mask_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mask.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Fields removed when data clearing is on, besides byte-valued ones.
    #[must_use]
    pub fn elide_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elide.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Encodes a message, truncated to [`MAX_LOGGED_BODY`] bytes.
    pub fn encode(&self, message: &dyn DynMessage, clear_data: bool) -> String {
        let value = if clear_data {
            message.to_json_value_without_bytes()
        } else {
            message.to_json_value()
        };
        match value {
            Ok(mut value) => {
                self.scrub(&mut value, clear_data);
                truncate(value.to_string(), MAX_LOGGED_BODY)
            }
            Err(err) => format!("error: {err}"),
        }
    }

    fn scrub(&self, value: &mut Value, clear_data: bool) {
        match value {
            Value::Object(map) => {
                if clear_data {
                    map.retain(|key, _| !self.elide.contains(key));
                }
                for (key, field) in map.iter_mut() {
                    if self.mask.contains(key) {
                        mask(field);
                    } else {
                        self.scrub(field, clear_data);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.scrub(item, clear_data);
                }
            }
            _ => {}
        }
    }
}

fn mask(value: &mut Value) {
    match value {
        Value::String(s) => *s = "*".to_string(),
        Value::Array(items) => items.iter_mut().for_each(mask),
        _ => {}
    }
}

fn truncate(mut text: String, limit: usize) -> String {
    if text.len() > limit {
        let mut cut = limit;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
    struct Login {
        #[prost(string, tag = "1")]
        #[serde(default)]
        username: String,
        #[prost(string, tag = "2")]
        #[serde(default)]
        password: String,
        #[prost(bytes = "vec", tag = "3")]
        #[serde(default)]
        avatar: Vec<u8>,
        #[prost(message, repeated, tag = "4")]
        #[serde(default)]
        devices: Vec<Device>,
    }

    #[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
    struct Device {
        #[prost(string, tag = "1")]
        #[serde(default)]
        password: String,
    }

    impl janus_core::Message for Login {}

    fn login() -> Login {
        Login {
            username: "ada".into(),
            password: "hunter2".into(),
            avatar: vec![1, 2, 3],
            devices: vec![Device {
                password: "1234".into(),
            }],
        }
    }

    #[test]
    fn test_mask_nested() {
        let encoder = BodyEncoder::new().mask_fields(["password"]);
        let body = encoder.encode(&login(), false);
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["username"], "ada");
        assert_eq!(value["password"], "*");
        assert_eq!(value["devices"][0]["password"], "*");
        assert!(value.get("avatar").is_some());
    }

    #[test]
    fn test_elide_only_when_clearing() {
        let encoder = BodyEncoder::new().elide_fields(["avatar"]);
        assert!(encoder.encode(&login(), false).contains("avatar"));
        assert!(!encoder.encode(&login(), true).contains("avatar"));
    }

    #[test]
    fn test_clearing_drops_bytes_without_elide_list() {
        let encoder = BodyEncoder::new().mask_fields(["password"]);
        let body = encoder.encode(&login(), true);
        let value: Value = serde_json::from_str(&body).unwrap();
        assert!(value.get("avatar").is_none(), "{body}");
        assert_eq!(value["username"], "ada");
        assert_eq!(value["password"], "*");
        assert_eq!(value["devices"][0]["password"], "*");
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let text = "é".repeat(3000);
        let cut = truncate(text, MAX_LOGGED_BODY);
        assert!(cut.len() <= MAX_LOGGED_BODY);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    proptest! {
        #[test]
        fn prop_encoded_body_bounded(username in ".{0,4000}") {
            let encoder = BodyEncoder::new().mask_fields(["password"]);
            let message = Login { username, ..login() };
            let body = encoder.encode(&message, true);
            prop_assert!(body.len() <= MAX_LOGGED_BODY);
            prop_assert!(!body.contains("\"password\":\"hunter2\""));
        }
    }
}
