//! # Janus Core
//!
//! Core types shared by every Janus crate.
//!
//! - [`Status`] / [`Code`] / [`CodeRegistry`] - the error taxonomy and its wire translation
//! - [`CallContext`] / [`CallMeta`] - per-call state handed to interceptors and handlers
//! - [`Message`] - a payload usable as protobuf and as JSON
//! - [`future::Join`] - fan-out/join of fallible tasks sharing a cancellation token
//! - [`closer::CloserStack`] - ordered teardown at shutdown
//! - [`page_token`] - the canonical page-token codec
//! - [`scrub`] - JSON rendering without byte-valued fields, for logs

#![doc(html_root_url = "https://docs.rs/janus-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod closer;
mod context;
pub mod duration;
pub mod future;
mod message;
pub mod page_token;
pub mod scrub;
mod status;

pub use closer::{CloseError, CloseErrors, CloserStack};
pub use context::{
    AuthInfo, CallContext, CallKind, CallMeta, Protocol, RequestId, ResponseMetadata,
    REQUEST_ID_HEADER,
};
pub use future::{Join, JoinError, Pending};
pub use message::{downcast, downcast_ref, BoxMessage, BoxMessageStream, DynMessage, Message, MessageStream};
pub use status::{
    Code, CodeRegistry, ErrorBody, FieldNaming, Status, FALLBACK_ERROR_BODY,
    FALLBACK_ERROR_BODY_CAMEL,
};
