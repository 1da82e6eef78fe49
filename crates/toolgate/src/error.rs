//! Unified error type for toolgate, and its HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use toolgate_engine::EngineError;
use toolgate_protocol::{ErrorBody, ProtocolError};
use toolgate_session::SessionError;
use toolgate_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so `?` converts sub-crate errors in handlers and in the server setup.
#[derive(Debug, thiserror::Error)]
pub enum ToolgateError {
    /// Binding or serving the listener failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request body could not be decoded (or a response encoded).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Authentication or session admission failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The session's engine could not be reached.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The server was configured with values it cannot run with.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ToolgateError {
    /// HTTP status for this error when it ends a request.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Transport(_) | Self::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Protocol(ProtocolError::Encode(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Protocol(_) => StatusCode::BAD_REQUEST,
            Self::Session(e) => match e {
                SessionError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                SessionError::UnknownSession(_) | SessionError::MissingSession => {
                    StatusCode::BAD_REQUEST
                }
                SessionError::HostNotAllowed(_) => StatusCode::FORBIDDEN,
                SessionError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
                SessionError::DuplicateSession(_) => StatusCode::CONFLICT,
                SessionError::HandshakeFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            // The engine went away between lookup and dispatch: to the
            // client that is the same as a closed session.
            Self::Engine(EngineError::Unavailable(_)) => StatusCode::BAD_REQUEST,
            Self::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Protocol(ProtocolError::Encode(_)) => "internal",
            Self::Protocol(_) => "bad_request",
            Self::Session(e) => e.code(),
            Self::Engine(EngineError::Unavailable(_)) => "bad_session",
            Self::Engine(e) => e.code(),
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.code(), self.to_string())
    }
}

impl IntoResponse for ToolgateError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, %status, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, Json(json!({ "error": self.to_body() }))).into_response()
    }
}
