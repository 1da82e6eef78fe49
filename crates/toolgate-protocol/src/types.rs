//! Core protocol types for toolgate's wire format.
//!
//! Every type in this module travels "on the wire": clients POST a
//! [`RequestEnvelope`] as JSON, the server answers with a
//! [`ResponseEnvelope`], and asynchronous [`Notification`]s are pushed
//! down the server-sent event stream.
//!
//! The shapes are deliberately small. The protocol layer frames tool
//! invocations and their outcomes; it never looks inside tool arguments
//! or results, which stay opaque `serde_json::Value`s.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The protocol version advertised in the initialization handshake.
pub const PROTOCOL_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Opaque identifier for a client session.
///
/// Session ids are generated by the server and handed to the client in a
/// response header on first contact. The client presents the same string
/// on every later request. The protocol layer treats the value as an
/// opaque string; the session layer decides how ids are minted.
///
/// `#[serde(transparent)]` makes a `SessionId("ab12")` serialize as the
/// plain string `"ab12"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a raw string as a session id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice (e.g. for a header value).
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// A message a client can send to its session's engine.
///
/// `#[serde(tag = "method")]` produces internally tagged JSON, so a call
/// looks like:
///   `{ "method": "call", "tool": "query", "arguments": { ... } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens a session. Only valid as the first message of a session.
    Initialize {
        /// Free-form client name, used for logging.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client: Option<String>,
    },

    /// Invokes one tool on the backend.
    Call {
        tool: String,
        /// Tool arguments. Defaults to an empty object when omitted.
        #[serde(default = "empty_arguments")]
        arguments: Value,
    },

    /// Asks for the tools the backend exposes.
    ListTools,

    /// Liveness check against the session's engine.
    Ping,

    /// Asks the engine to end the session after replying.
    Close,
}

impl ClientMessage {
    /// Returns `true` for the message that opens a session.
    pub fn is_initialize(&self) -> bool {
        matches!(self, Self::Initialize { .. })
    }

    /// Short method name, for logging.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::Call { .. } => "call",
            Self::ListTools => "list_tools",
            Self::Ping => "ping",
            Self::Close => "close",
        }
    }
}

fn empty_arguments() -> Value {
    Value::Object(serde_json::Map::new())
}

/// The body of every POST: an optional correlation id plus the message.
///
/// The `id` is echoed back verbatim in the response so clients that
/// pipeline requests can match replies. It may be any JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(flatten)]
    pub message: ClientMessage,
}

impl RequestEnvelope {
    /// Builds an envelope without a correlation id.
    pub fn new(message: ClientMessage) -> Self {
        Self { id: None, message }
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// A structured error carried in a response body.
///
/// `code` is a stable snake_case identifier (`unknown_tool`,
/// `bad_session`, ...). `message` is for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Either a result or an error, never both.
///
/// Externally tagged and flattened into [`ResponseEnvelope`], so the JSON
/// is `{ "result": ... }` or `{ "error": { "code": ..., "message": ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Result(Value),
    Error(ErrorBody),
}

/// The body of every POST response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ResponseEnvelope {
    /// A successful response echoing `id`.
    pub fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Result(result),
        }
    }

    /// An error response echoing `id`.
    pub fn error(id: Option<Value>, error: ErrorBody) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error),
        }
    }

    /// Returns `true` if this response carries an error payload.
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

/// Result of a successful initialization handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeResult {
    pub protocol_version: u32,
    pub server_name: String,
    pub server_version: String,
}

/// Describes one tool exposed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's `arguments` object.
    #[serde(default = "empty_arguments")]
    pub input_schema: Value,
}

/// An asynchronous message pushed to a session's event stream.
///
/// `#[serde(tag = "event")]` gives `{ "event": "tool_completed", "tool": "x" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// A tool call on this session finished successfully.
    ToolCompleted { tool: String },

    /// A tool call on this session failed.
    ToolFailed { tool: String, message: String },

    /// The session is ending; no more events will follow.
    SessionClosed { reason: String },
}

impl Notification {
    /// The event name used for the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ToolCompleted { .. } => "tool_completed",
            Self::ToolFailed { .. } => "tool_failed",
            Self::SessionClosed { .. } => "session_closed",
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
