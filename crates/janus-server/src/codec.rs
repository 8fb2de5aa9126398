//! Protobuf codec over erased messages and gRPC status translation.
//!
//! The method table stores one decode function pointer per method, so a
//! single codec type serves every registered method.

use bytes::{Buf, BufMut, Bytes};
use http::{HeaderMap, HeaderValue};
use janus_core::{BoxMessage, Code, Message, Status};
use serde_json::Value;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::metadata::MetadataMap;

/// Trailer carrying application codes (>= 100) on the gRPC wire.
pub const ERROR_CODE_TRAILER: &str = "x-error-code";

/// Decodes protobuf bytes into an erased message.
pub type DecodeFn = fn(&[u8]) -> Result<BoxMessage, Status>;

/// Protobuf decoder for `T`, erased.
pub fn decode_protobuf<T: Message>(bytes: &[u8]) -> Result<BoxMessage, Status> {
    T::decode(bytes)
        .map(|message| Box::new(message) as BoxMessage)
        .map_err(|e| Status::invalid_argument(format!("invalid protobuf message: {e}")))
}

/// tonic codec for erased messages.
#[derive(Debug, Clone, Copy)]
pub struct DynCodec {
    decode: DecodeFn,
}

impl DynCodec {
    /// Codec decoding with `decode`.
    pub const fn new(decode: DecodeFn) -> Self {
        Self { decode }
    }

    /// Codec decoding into `T`.
    pub fn of<T: Message>() -> Self {
        Self::new(decode_protobuf::<T>)
    }
}

impl Codec for DynCodec {
    type Encode = BoxMessage;
    type Decode = BoxMessage;
    type Encoder = DynEncoder;
    type Decoder = DynDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynDecoder { decode: self.decode }
    }
}

/// Encoder half of [`DynCodec`].
#[derive(Debug, Clone, Copy)]
pub struct DynEncoder;

impl Encoder for DynEncoder {
    type Item = BoxMessage;
    type Error = tonic::Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put_slice(&item.encode_protobuf());
        Ok(())
    }
}

/// Decoder half of [`DynCodec`].
#[derive(Debug, Clone, Copy)]
pub struct DynDecoder {
    decode: DecodeFn,
}

impl Decoder for DynDecoder {
    type Item = BoxMessage;
    type Error = tonic::Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let bytes = src.copy_to_bytes(src.remaining());
        (self.decode)(&bytes)
            .map(Some)
            .map_err(|status| to_grpc_status(&status, HeaderMap::new()))
    }
}

/// Translates a status for the gRPC wire.
///
/// Canonical codes map to `grpc-status`; application codes travel as
/// `UNKNOWN` plus an `x-error-code` trailer. Details are JSON in
/// `grpc-status-details-bin`. `headers` are added to the trailers.
pub fn to_grpc_status(status: &Status, mut headers: HeaderMap) -> tonic::Status {
    let code = status.code();
    let grpc_code = if code.is_canonical() {
        tonic::Code::from_i32(code.value() as i32)
    } else {
        headers.insert(ERROR_CODE_TRAILER, HeaderValue::from(code.value()));
        tonic::Code::Unknown
    };
    let details = if status.details().is_empty() {
        Bytes::new()
    } else {
        serde_json::to_vec(status.details()).map(Bytes::from).unwrap_or_default()
    };
    tonic::Status::with_details_and_metadata(
        grpc_code,
        status.message(),
        details,
        MetadataMap::from_headers(headers),
    )
}

/// Recovers a status from the gRPC wire, including application codes.
pub fn from_grpc_status(status: &tonic::Status) -> Status {
    let code = status
        .metadata()
        .get(ERROR_CODE_TRAILER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u32>().ok())
        .map_or_else(|| Code::new(status.code() as u32), Code::new);
    let details = if status.details().is_empty() {
        Vec::new()
    } else {
        serde_json::from_slice::<Vec<Value>>(status.details()).unwrap_or_default()
    };
    Status::new(code, status.message()).with_details(details)
}
