//! Codec trait and the JSON implementation.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The router never calls `serde_json` directly; it goes through a
//! [`Codec`], so the body format is decided in one place.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// request handler task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// MIME type written in the `Content-Type` response header.
    const CONTENT_TYPE: &'static str;

    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidMessage` for an empty body and
    /// `ProtocolError::Decode` for anything that does not parse.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use toolgate_protocol::{ClientMessage, Codec, JsonCodec, RequestEnvelope};
///
/// let codec = JsonCodec;
/// let req: RequestEnvelope = codec.decode(br#"{"method":"ping"}"#).unwrap();
/// assert_eq!(req.message, ClientMessage::Ping);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    const CONTENT_TYPE: &'static str = "application/json";

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Err(ProtocolError::InvalidMessage("empty request body".into()));
        }
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
