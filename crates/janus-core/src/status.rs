//! Error taxonomy and wire-code translation.
//!
//! Every failure that leaves the gateway is normalized into a [`Status`].
//! A [`Code`] is an open numeric space: the seventeen canonical RPC codes
//! are predefined, and application codes (for example `4404`) are given
//! names at startup through a [`CodeRegistry`].
//!
//! # HTTP translation
//!
//! Canonical codes use the conventional RPC-to-HTTP table. Application
//! codes above 100 are used verbatim when they already fall inside
//! `200..599`; otherwise the leading digit selects a band:
//!
//! | Leading digit | HTTP status |
//! |---------------|-------------|
//! | `2`           | 200         |
//! | `4`           | 400         |
//! | anything else | 500         |
//!
//! # Example
//!
//! ```
//! use janus_core::{Code, CodeRegistry, Status};
//!
//! let mut registry = CodeRegistry::new();
//! registry.register([(4404, "custom_not_found")]);
//!
//! let status = Status::new(Code::new(4404), "widget missing");
//! assert_eq!(registry.name(status.code()), "custom_not_found");
//! assert_eq!(status.code().http_status().as_u16(), 400);
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A numeric status code shared by both wire protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Code(u32);

impl Code {
    /// Not an error.
    pub const OK: Self = Self(0);
    /// The operation was cancelled, typically by the caller.
    pub const CANCELLED: Self = Self(1);
    /// Unknown error.
    pub const UNKNOWN: Self = Self(2);
    /// The client supplied an invalid argument.
    pub const INVALID_ARGUMENT: Self = Self(3);
    /// The deadline expired before the operation could complete.
    pub const DEADLINE_EXCEEDED: Self = Self(4);
    /// Some requested entity was not found.
    pub const NOT_FOUND: Self = Self(5);
    /// The entity a client attempted to create already exists.
    pub const ALREADY_EXISTS: Self = Self(6);
    /// The caller lacks permission for the operation.
    pub const PERMISSION_DENIED: Self = Self(7);
    /// Some resource (quota, rate) has been exhausted.
    pub const RESOURCE_EXHAUSTED: Self = Self(8);
    /// The system is not in a state required for the operation.
    pub const FAILED_PRECONDITION: Self = Self(9);
    /// The operation was aborted.
    pub const ABORTED: Self = Self(10);
    /// The operation was attempted past the valid range.
    pub const OUT_OF_RANGE: Self = Self(11);
    /// The operation is not implemented.
    pub const UNIMPLEMENTED: Self = Self(12);
    /// Internal invariant broken.
    pub const INTERNAL: Self = Self(13);
    /// The service is currently unavailable.
    pub const UNAVAILABLE: Self = Self(14);
    /// Unrecoverable data loss or corruption.
    pub const DATA_LOSS: Self = Self(15);
    /// The request lacks valid authentication credentials.
    pub const UNAUTHENTICATED: Self = Self(16);

    /// Creates a code from its numeric value.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns `true` for the seventeen predefined RPC codes.
    pub const fn is_canonical(self) -> bool {
        self.0 <= 16
    }

    /// Returns the built-in symbolic name of a canonical code.
    pub const fn canonical_name(self) -> Option<&'static str> {
        let name = match self.0 {
            0 => "ok",
            1 => "canceled",
            2 => "unknown",
            3 => "invalid_argument",
            4 => "deadline_exceeded",
            5 => "not_found",
            6 => "already_exists",
            7 => "permission_denied",
            8 => "resource_exhausted",
            9 => "failed_precondition",
            10 => "aborted",
            11 => "out_of_range",
            12 => "unimplemented",
            13 => "internal",
            14 => "unavailable",
            15 => "data_loss",
            16 => "unauthenticated",
            _ => return None,
        };
        Some(name)
    }

    /// Translates the code into an HTTP status. Never fails.
    pub fn http_status(self) -> StatusCode {
        if self.0 > 100 {
            return application_http_status(self.0);
        }
        match self {
            Self::OK => StatusCode::OK,
            Self::CANCELLED => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Self::INVALID_ARGUMENT | Self::FAILED_PRECONDITION | Self::OUT_OF_RANGE => {
                StatusCode::BAD_REQUEST
            }
            Self::DEADLINE_EXCEEDED => StatusCode::GATEWAY_TIMEOUT,
            Self::NOT_FOUND => StatusCode::NOT_FOUND,
            Self::ALREADY_EXISTS | Self::ABORTED => StatusCode::CONFLICT,
            Self::PERMISSION_DENIED => StatusCode::FORBIDDEN,
            Self::RESOURCE_EXHAUSTED => StatusCode::TOO_MANY_REQUESTS,
            Self::UNIMPLEMENTED => StatusCode::NOT_IMPLEMENTED,
            Self::UNAVAILABLE => StatusCode::SERVICE_UNAVAILABLE,
            Self::UNAUTHENTICATED => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Leading decimal digit of the code.
    pub const fn leading_digit(self) -> u32 {
        let mut value = self.0;
        while value >= 10 {
            value /= 10;
        }
        value
    }
}

fn application_http_status(code: u32) -> StatusCode {
    if (200..599).contains(&code) {
        if let Ok(status) = StatusCode::from_u16(code as u16) {
            return status;
        }
    }
    match Code(code).leading_digit() {
        2 => StatusCode::OK,
        4 => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl From<u32> for Code {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Code> for u32 {
    fn from(code: Code) -> Self {
        code.0
    }
}

/// Canonical error representation flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Status {
    code: Code,
    message: String,
    details: Vec<Value>,
}

macro_rules! status_constructors {
    ($($(#[$doc:meta])* $fn_name:ident => $code:ident,)*) => {
        $(
            $(#[$doc])*
            pub fn $fn_name(message: impl Into<String>) -> Self {
                Self::new(Code::$code, message)
            }
        )*
    };
}

impl Status {
    /// Creates a status with the given code and message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    status_constructors! {
        /// `canceled` status.
        cancelled => CANCELLED,
        /// `unknown` status.
        unknown => UNKNOWN,
        /// `invalid_argument` status.
        invalid_argument => INVALID_ARGUMENT,
        /// `deadline_exceeded` status.
        deadline_exceeded => DEADLINE_EXCEEDED,
        /// `not_found` status.
        not_found => NOT_FOUND,
        /// `already_exists` status.
        already_exists => ALREADY_EXISTS,
        /// `permission_denied` status.
        permission_denied => PERMISSION_DENIED,
        /// `resource_exhausted` status.
        resource_exhausted => RESOURCE_EXHAUSTED,
        /// `failed_precondition` status.
        failed_precondition => FAILED_PRECONDITION,
        /// `aborted` status.
        aborted => ABORTED,
        /// `out_of_range` status.
        out_of_range => OUT_OF_RANGE,
        /// `unimplemented` status.
        unimplemented => UNIMPLEMENTED,
        /// `internal` status.
        internal => INTERNAL,
        /// `unavailable` status.
        unavailable => UNAVAILABLE,
        /// `data_loss` status.
        data_loss => DATA_LOSS,
        /// `unauthenticated` status.
        unauthenticated => UNAUTHENTICATED,
    }

    /// Appends a structured detail entry.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.details.push(detail);
        self
    }

    /// Replaces all detail entries.
    pub fn with_details(mut self, details: Vec<Value>) -> Self {
        self.details = details;
        self
    }

    /// The status code.
    pub const fn code(&self) -> Code {
        self.code
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Structured details.
    pub fn details(&self) -> &[Value] {
        &self.details
    }

    /// Returns `true` for cancellation and deadline codes, which describe
    /// the caller rather than a server fault.
    pub fn is_caller_termination(&self) -> bool {
        matches!(self.code, Code::CANCELLED | Code::DEADLINE_EXCEEDED)
    }

    /// Renders the wire error body for this status.
    pub fn to_error_body(&self, registry: &CodeRegistry) -> ErrorBody {
        ErrorBody {
            error: registry.name(self.code).into_owned(),
            error_code: self.code.value(),
            error_description: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

impl From<anyhow::Error> for Status {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<Status>() {
            Ok(status) => status,
            Err(err) => Self::internal(format!("{err:#}")),
        }
    }
}

/// Names for application-specific codes, consulted before canonical names.
///
/// Built once before the server starts and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct CodeRegistry {
    names: HashMap<Code, String>,
}

impl CodeRegistry {
    /// Creates a registry with only the canonical names.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers names for application codes. Later entries override earlier ones.
    pub fn register<I, N>(&mut self, codes: I) -> &mut Self
    where
        I: IntoIterator<Item = (u32, N)>,
        N: Into<String>,
    {
        for (code, name) in codes {
            self.names.insert(Code(code), name.into());
        }
        self
    }

    /// Symbolic name for a code; unregistered application codes render as decimal.
    pub fn name(&self, code: Code) -> Cow<'_, str> {
        if let Some(name) = self.names.get(&code) {
            return Cow::Borrowed(name.as_str());
        }
        match code.canonical_name() {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(code.value().to_string()),
        }
    }

    /// Reverse lookup of a symbolic name.
    pub fn code_of(&self, name: &str) -> Option<Code> {
        self.names
            .iter()
            .find(|(_, registered)| registered.as_str() == name)
            .map(|(code, _)| *code)
            .or_else(|| (0..=16).map(Code).find(|c| c.canonical_name() == Some(name)))
            .or_else(|| name.parse().ok().map(Code))
    }

    /// Number of registered application codes.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` when no application codes are registered.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// JSON field naming applied to wire bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldNaming {
    /// `error_code`, `error_description`.
    #[default]
    SnakeCase,
    /// `errorCode`, `errorDescription`.
    CamelCase,
}

/// Body returned when the error body itself cannot be marshaled (snake case).
pub const FALLBACK_ERROR_BODY: &str =
    r#"{"error": "internal","error_description":"failed to marshal error message"}"#;

/// Body returned when the error body itself cannot be marshaled (camel case).
pub const FALLBACK_ERROR_BODY_CAMEL: &str =
    r#"{"error": "internal","errorDescription":"failed to marshal error message"}"#;

/// The JSON error body written to HTTP clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Symbolic code name.
    pub error: String,
    /// Exact numeric code.
    #[serde(alias = "errorCode")]
    pub error_code: u32,
    /// Human-readable message.
    #[serde(alias = "errorDescription", default)]
    pub error_description: String,
    /// Structured details.
    #[serde(default)]
    pub details: Vec<Value>,
}

impl ErrorBody {
    /// Serializes the body with the requested field naming.
    pub fn to_vec(&self, naming: FieldNaming) -> Result<Vec<u8>, serde_json::Error> {
        let (code_key, description_key) = match naming {
            FieldNaming::SnakeCase => ("error_code", "error_description"),
            FieldNaming::CamelCase => ("errorCode", "errorDescription"),
        };
        let mut object = Map::with_capacity(4);
        object.insert("error".to_string(), Value::String(self.error.clone()));
        object.insert(code_key.to_string(), Value::from(self.error_code));
        object.insert(
            description_key.to_string(),
            Value::String(self.error_description.clone()),
        );
        object.insert("details".to_string(), Value::Array(self.details.clone()));
        serde_json::to_vec(&Value::Object(object))
    }

    /// Parses a body written in either naming style.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Rebuilds the status carried by this body.
    pub fn into_status(self) -> Status {
        Status::new(Code(self.error_code), self.error_description).with_details(self.details)
    }

    /// The fallback literal for the given naming.
    pub const fn fallback(naming: FieldNaming) -> &'static str {
        match naming {
            FieldNaming::SnakeCase => FALLBACK_ERROR_BODY,
            FieldNaming::CamelCase => FALLBACK_ERROR_BODY_CAMEL,
        }
    }
}
