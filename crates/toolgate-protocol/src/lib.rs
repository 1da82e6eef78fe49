//! Wire protocol for toolgate.
//!
//! This crate defines what clients and the server say to each other:
//!
//! - **Types** ([`RequestEnvelope`], [`ClientMessage`], [`ResponseEnvelope`],
//!   [`Notification`], ...): the JSON shapes on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): bytes ↔ types.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (HTTP bodies) → Protocol (envelopes) → Session (engine per client)
//! ```
//!
//! The protocol layer knows nothing about sessions or tools; tool
//! arguments and results pass through as opaque JSON values.

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    ClientMessage, ErrorBody, InitializeResult, Notification, Outcome,
    PROTOCOL_VERSION, RequestEnvelope, ResponseEnvelope, SessionId,
    ToolDescriptor,
};
