//! # toolgate
//!
//! Session-managed HTTP transport for tool servers.
//!
//! A tool provider implements one trait, [`ToolBackend`]. toolgate puts it
//! behind a single HTTP endpoint where clients open stateful sessions,
//! each served by its own engine:
//!
//! - `POST /mcp` with `{"method":"initialize"}` opens a session and returns
//!   its id in the `mcp-session-id` header
//! - later `POST`s carrying that header are routed to the same session
//! - `GET /mcp` streams the session's notifications as server-sent events
//! - `DELETE /mcp` ends the session
//! - `GET /health` reports liveness and the session count
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use toolgate::prelude::*;
//!
//! // Implement ToolBackend for your tools, then:
//! // let server = ToolgateServer::builder()
//! //     .bind("127.0.0.1:8080")
//! //     .shared_secret("s3cret")
//! //     .build(MyTools)
//! //     .await?;
//! // server.run().await
//! ```

mod error;
mod handler;
mod server;
mod shutdown;

pub use error::ToolgateError;
pub use handler::SESSION_HEADER;
pub use server::{DEFAULT_ENDPOINT, DEFAULT_KEEP_ALIVE, ToolgateServer, ToolgateServerBuilder};
pub use shutdown::ShutdownHandle;

pub use toolgate_engine::{EngineConfig, ToolBackend, ToolError};
pub use toolgate_protocol::ToolDescriptor;
pub use toolgate_session::{Authenticator, SessionConfig, SessionError, SharedSecret};

/// Everything needed to stand up a server.
pub mod prelude {
    pub use crate::{
        Authenticator, EngineConfig, SESSION_HEADER, SessionConfig, SessionError,
        SharedSecret, ShutdownHandle, ToolBackend, ToolDescriptor, ToolError,
        ToolgateError, ToolgateServer, ToolgateServerBuilder,
    };
}
