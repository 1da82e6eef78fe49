//! Error types for the protocol layer.
//!
//! Each crate in toolgate defines its own error enum. A `ProtocolError`
//! always means the bytes on the wire were wrong, never that a session
//! or a tool misbehaved.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, a missing `method`, an
    /// unknown method name, or a field of the wrong type.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The body parsed but breaks a protocol rule (e.g. an empty body).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
