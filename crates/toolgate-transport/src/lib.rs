//! HTTP transport layer for toolgate.
//!
//! Owns the listening socket and the serve loop. Everything above this
//! crate sees requests as axum handlers; everything below is tokio's
//! TCP listener.
//!
//! A failed bind is the one fatal error in the system: it surfaces as
//! [`TransportError::Bind`] before any session state exists.

mod error;
mod http;

pub use error::TransportError;
pub use http::HttpListener;

use std::fmt;

/// Opaque identifier for one HTTP request, used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Creates a new `RequestId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}
