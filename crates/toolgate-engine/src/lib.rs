//! Per-session protocol engines for toolgate.
//!
//! Each session is bound to one engine: an isolated Tokio task (actor
//! model) that owns the session's protocol state and forwards tool calls
//! to a shared [`ToolBackend`].
//!
//! # Key types
//!
//! - [`ToolBackend`]: the trait a tool provider implements
//! - [`spawn_engine`] / [`EngineHandle`]: start and talk to an engine
//! - [`EngineExit`] / [`CloseReason`]: how an engine reports that it stopped
//! - [`EngineConfig`]: mailbox and notification sizing

#![allow(async_fn_in_trait)]

mod backend;
mod config;
mod engine;
mod error;

pub use backend::ToolBackend;
pub use config::{DEFAULT_MAILBOX_SIZE, DEFAULT_NOTIFICATION_CAPACITY, EngineConfig};
pub use engine::{CloseReason, EngineExit, EngineHandle, ExitSender, spawn_engine};
pub use error::{EngineError, ToolError};
