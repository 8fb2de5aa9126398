//! JSON rendering with byte-valued fields left out.
//!
//! A protobuf `bytes` field is a `Vec<u8>` (serialized element by element as
//! `u8`) or a `bytes::Bytes` (serialized through `serialize_bytes`). Both are
//! recognized while serializing, so no per-message field list is needed.
//! Struct fields and map entries holding bytes are dropped; a top-level
//! bytes value renders as `null`.

use serde::ser::{self, Serialize};
use serde_json::{Map, Value};

/// Serializes `value` to JSON without its byte-valued fields.
pub fn to_value_without_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Value, serde_json::Error> {
    Ok(value.serialize(Scrubber)?.into_value())
}

enum Node {
    Value(Value),
    Byte(u8),
    Bytes,
}

impl Node {
    fn into_value(self) -> Value {
        match self {
            Self::Value(value) => value,
            Self::Byte(b) => Value::from(b),
            Self::Bytes => Value::Null,
        }
    }
}

fn json<T: Serialize + ?Sized>(value: &T) -> Result<Node, serde_json::Error> {
    serde_json::to_value(value).map(Node::Value)
}

#[derive(Clone, Copy)]
struct Scrubber;

impl ser::Serializer for Scrubber {
    type Ok = Node;
    type Error = serde_json::Error;
    type SerializeSeq = SeqScrubber;
    type SerializeTuple = SeqScrubber;
    type SerializeTupleStruct = SeqScrubber;
    type SerializeTupleVariant = VariantScrubber<SeqScrubber>;
    type SerializeMap = MapScrubber;
    type SerializeStruct = MapScrubber;
    type SerializeStructVariant = VariantScrubber<MapScrubber>;

    fn serialize_bool(self, v: bool) -> Result<Node, Self::Error> {
        Ok(Node::Value(Value::Bool(v)))
    }

    fn serialize_i8(self, v: i8) -> Result<Node, Self::Error> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i16(self, v: i16) -> Result<Node, Self::Error> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i32(self, v: i32) -> Result<Node, Self::Error> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i64(self, v: i64) -> Result<Node, Self::Error> {
        Ok(Node::Value(Value::from(v)))
    }

    fn serialize_i128(self, v: i128) -> Result<Node, Self::Error> {
        json(&v)
    }

    fn serialize_u8(self, v: u8) -> Result<Node, Self::Error> {
        Ok(Node::Byte(v))
    }

    fn serialize_u16(self, v: u16) -> Result<Node, Self::Error> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u32(self, v: u32) -> Result<Node, Self::Error> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u64(self, v: u64) -> Result<Node, Self::Error> {
        Ok(Node::Value(Value::from(v)))
    }

    fn serialize_u128(self, v: u128) -> Result<Node, Self::Error> {
        json(&v)
    }

    fn serialize_f32(self, v: f32) -> Result<Node, Self::Error> {
        self.serialize_f64(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<Node, Self::Error> {
        Ok(Node::Value(Value::from(v)))
    }

    fn serialize_char(self, v: char) -> Result<Node, Self::Error> {
        Ok(Node::Value(Value::String(v.to_string())))
    }

    fn serialize_str(self, v: &str) -> Result<Node, Self::Error> {
        Ok(Node::Value(Value::String(v.to_owned())))
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<Node, Self::Error> {
        Ok(Node::Bytes)
    }

    fn serialize_none(self) -> Result<Node, Self::Error> {
        Ok(Node::Value(Value::Null))
    }

    fn serialize_some<T>(self, value: &T) -> Result<Node, Self::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Node, Self::Error> {
        Ok(Node::Value(Value::Null))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Node, Self::Error> {
        Ok(Node::Value(Value::Null))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Node, Self::Error> {
        Ok(Node::Value(Value::String(variant.to_owned())))
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<Node, Self::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Node, Self::Error>
    where
        T: ?Sized + Serialize,
    {
        let mut map = Map::new();
        map.insert(variant.to_owned(), value.serialize(self)?.into_value());
        Ok(Node::Value(Value::Object(map)))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqScrubber, Self::Error> {
        Ok(SeqScrubber {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqScrubber, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<SeqScrubber, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantScrubber<SeqScrubber>, Self::Error> {
        Ok(VariantScrubber {
            variant,
            inner: self.serialize_seq(Some(len))?,
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapScrubber, Self::Error> {
        Ok(MapScrubber::default())
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<MapScrubber, Self::Error> {
        Ok(MapScrubber::default())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<VariantScrubber<MapScrubber>, Self::Error> {
        Ok(VariantScrubber {
            variant,
            inner: MapScrubber::default(),
        })
    }
}

struct SeqScrubber {
    items: Vec<Node>,
}

impl SeqScrubber {
    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        self.items.push(value.serialize(Scrubber)?);
        Ok(())
    }

    // all-u8 is a bytes field, all-bytes is a repeated bytes field
    fn finish(self) -> Node {
        let is_bytes = !self.items.is_empty()
            && (self.items.iter().all(|n| matches!(n, Node::Byte(_)))
                || self.items.iter().all(|n| matches!(n, Node::Bytes)));
        if is_bytes {
            return Node::Bytes;
        }
        Node::Value(Value::Array(self.items.into_iter().map(Node::into_value).collect()))
    }
}

impl ser::SerializeSeq for SeqScrubber {
    type Ok = Node;
    type Error = serde_json::Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Node, Self::Error> {
        Ok(self.finish())
    }
}

impl ser::SerializeTuple for SeqScrubber {
    type Ok = Node;
    type Error = serde_json::Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Node, Self::Error> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleStruct for SeqScrubber {
    type Ok = Node;
    type Error = serde_json::Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Node, Self::Error> {
        Ok(self.finish())
    }
}

#[derive(Default)]
struct MapScrubber {
    map: Map<String, Value>,
    key: Option<String>,
}

impl MapScrubber {
    fn insert(&mut self, key: String, node: Node) {
        if !matches!(node, Node::Bytes) {
            self.map.insert(key, node.into_value());
        }
    }
}

impl ser::SerializeMap for MapScrubber {
    type Ok = Node;
    type Error = serde_json::Error;

    fn serialize_key<T>(&mut self, key: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        let key = match serde_json::to_value(key)? {
            Value::String(s) => s,
            other => other.to_string(),
        };
        self.key = Some(key);
        Ok(())
    }

    fn serialize_value<T>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        let key = self.key.take().unwrap_or_default();
        let node = value.serialize(Scrubber)?;
        self.insert(key, node);
        Ok(())
    }

    fn end(self) -> Result<Node, Self::Error> {
        Ok(Node::Value(Value::Object(self.map)))
    }
}

impl ser::SerializeStruct for MapScrubber {
    type Ok = Node;
    type Error = serde_json::Error;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        let node = value.serialize(Scrubber)?;
        self.insert(key.to_owned(), node);
        Ok(())
    }

    fn end(self) -> Result<Node, Self::Error> {
        Ok(Node::Value(Value::Object(self.map)))
    }
}

struct VariantScrubber<S> {
    variant: &'static str,
    inner: S,
}

impl<S> VariantScrubber<S> {
    fn wrap(variant: &'static str, value: Value) -> Node {
        let mut map = Map::new();
        map.insert(variant.to_owned(), value);
        Node::Value(Value::Object(map))
    }
}

impl ser::SerializeTupleVariant for VariantScrubber<SeqScrubber> {
    type Ok = Node;
    type Error = serde_json::Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        self.inner.push(value)
    }

    fn end(self) -> Result<Node, Self::Error> {
        Ok(Self::wrap(self.variant, self.inner.finish().into_value()))
    }
}

impl ser::SerializeStructVariant for VariantScrubber<MapScrubber> {
    type Ok = Node;
    type Error = serde_json::Error;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<(), Self::Error>
    where
        T: ?Sized + Serialize,
    {
        ser::SerializeStruct::serialize_field(&mut self.inner, key, value)
    }

    fn end(self) -> Result<Node, Self::Error> {
        Ok(Self::wrap(self.variant, Value::Object(self.inner.map)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use serde::Serialize;
    use serde_json::json;

    #[derive(Serialize)]
    struct Upload {
        name: String,
        blob: Vec<u8>,
        chunks: Vec<Vec<u8>>,
        thumbnail: Option<Vec<u8>>,
        sizes: Vec<u32>,
        parts: Vec<Part>,
        attachments: BTreeMap<String, Vec<u8>>,
        labels: BTreeMap<String, String>,
    }

    #[derive(Serialize)]
    struct Part {
        id: u32,
        data: Vec<u8>,
    }

    fn upload() -> Upload {
        Upload {
            name: "report.pdf".into(),
            blob: vec![0xde, 0xad],
            chunks: vec![vec![1], vec![2, 3]],
            thumbnail: Some(vec![9, 9]),
            sizes: vec![1, 2, 3],
            parts: vec![Part { id: 7, data: vec![4] }],
            attachments: BTreeMap::from([("sig".to_string(), vec![5])]),
            labels: BTreeMap::from([("kind".to_string(), "doc".to_string())]),
        }
    }

    #[test]
    fn test_bytes_fields_dropped_at_every_depth() {
        let value = to_value_without_bytes(&upload()).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "report.pdf",
                "sizes": [1, 2, 3],
                "parts": [{"id": 7}],
                "attachments": {},
                "labels": {"kind": "doc"},
            })
        );
    }

    #[test]
    fn test_empty_bytes_kept_as_empty_array() {
        let part = Part { id: 1, data: Vec::new() };
        assert_eq!(to_value_without_bytes(&part).unwrap(), json!({"id": 1, "data": []}));
    }

    #[test]
    fn test_matches_serde_json_without_bytes() {
        #[derive(Serialize)]
        enum Shape {
            Circle { radius: f64 },
            Named(String),
            Empty,
        }

        let shapes = vec![Shape::Circle { radius: 1.5 }, Shape::Named("sq".into()), Shape::Empty];
        assert_eq!(
            to_value_without_bytes(&shapes).unwrap(),
            serde_json::to_value(&shapes).unwrap()
        );
    }
}
