//! Error types for the engine layer.

use toolgate_protocol::{ErrorBody, SessionId};

/// Errors a [`ToolBackend`](crate::ToolBackend) reports for one call.
///
/// These never tear a session down. The engine turns them into an error
/// payload inside an otherwise ordinary response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// No tool with this name exists.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The arguments did not fit the tool's input schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed (e.g. a malformed downstream payload).
    #[error("tool failed: {0}")]
    Failed(String),
}

impl ToolError {
    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::Failed(_) => "tool_failed",
        }
    }
}

/// Errors that can occur while talking to an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// `initialize` arrived on a session that already completed its handshake.
    #[error("session already initialized")]
    AlreadyInitialized,

    /// A non-handshake message reached an engine that never initialized.
    #[error("session not initialized")]
    NotInitialized,

    /// The backend rejected or failed a tool call.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The engine actor has stopped; its command channel is closed.
    #[error("engine for session {0} is unavailable")]
    Unavailable(SessionId),
}

impl EngineError {
    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyInitialized => "already_initialized",
            Self::NotInitialized => "not_initialized",
            Self::Tool(e) => e.code(),
            Self::Unavailable(_) => "engine_unavailable",
        }
    }

    /// Converts the error into the body carried by an error response.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.code(), self.to_string())
    }
}
