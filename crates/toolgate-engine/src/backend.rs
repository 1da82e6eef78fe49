//! The `ToolBackend` trait: the collaborator that actually runs tools.
//!
//! toolgate does not know what a tool does. Loading files, running
//! queries, validating schemas: all of that lives behind this trait.
//! The engine hands it a tool name and an arguments object, and frames
//! whatever comes back as a response.

use std::future::Future;

use serde_json::Value;
use toolgate_protocol::ToolDescriptor;

use crate::ToolError;

/// Executes named tools on behalf of sessions.
///
/// One backend instance is shared (behind an `Arc`) by every session's
/// engine, so it must be `Send + Sync`. It keeps no per-session state;
/// anything a session needs to remember belongs to its engine.
///
/// # Example
///
/// ```rust
/// use serde_json::{Value, json};
/// use toolgate_engine::{ToolBackend, ToolError};
/// use toolgate_protocol::ToolDescriptor;
///
/// struct Echo;
///
/// impl ToolBackend for Echo {
///     fn list_tools(&self) -> Vec<ToolDescriptor> {
///         vec![ToolDescriptor {
///             name: "echo".into(),
///             description: "Returns its arguments".into(),
///             input_schema: json!({"type": "object"}),
///         }]
///     }
///
///     async fn execute(&self, tool: &str, arguments: Value) -> Result<Value, ToolError> {
///         match tool {
///             "echo" => Ok(arguments),
///             other => Err(ToolError::UnknownTool(other.to_string())),
///         }
///     }
/// }
/// ```
pub trait ToolBackend: Send + Sync + 'static {
    /// Describes every tool this backend can run.
    fn list_tools(&self) -> Vec<ToolDescriptor>;

    /// Runs `tool` with `arguments`.
    ///
    /// Called once per `call` request, after the session has been
    /// resolved. Never called concurrently for the same session.
    fn execute(
        &self,
        tool: &str,
        arguments: Value,
    ) -> impl Future<Output = Result<Value, ToolError>> + Send;
}
