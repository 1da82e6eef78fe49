//! Error types for the session layer.

use toolgate_protocol::SessionId;

/// Errors that can occur while admitting a request to a session.
///
/// All of these are decided before any engine sees the request, so the
/// tool backend is never invoked for a request that fails here.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A shared secret is configured and the request did not present it.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The request named a session that does not exist (never did, or
    /// was closed). The client must initialize a new one.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// A non-initialization request arrived without a session id.
    #[error("missing session id; send an initialize request first")]
    MissingSession,

    /// The `Host` header of an initialization request is not allowed.
    #[error("host not allowed: {0:?}")]
    HostNotAllowed(String),

    /// The server is shutting down and no longer creates sessions.
    #[error("server is shutting down")]
    ShuttingDown,

    /// A session with this id is already registered.
    #[error("session {0} already exists")]
    DuplicateSession(SessionId),

    /// The engine rejected or never completed the handshake.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
}

impl SessionError {
    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::UnknownSession(_) | Self::MissingSession => "bad_session",
            Self::HostNotAllowed(_) => "host_not_allowed",
            Self::ShuttingDown => "shutting_down",
            Self::DuplicateSession(_) => "duplicate_session",
            Self::HandshakeFailed(_) => "handshake_failed",
        }
    }

    /// Returns `true` for the BadSession family of errors.
    pub fn is_bad_session(&self) -> bool {
        matches!(self, Self::UnknownSession(_) | Self::MissingSession)
    }
}
