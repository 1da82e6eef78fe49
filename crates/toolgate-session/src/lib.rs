//! Session management for toolgate.
//!
//! This crate decides which session a request belongs to, and whether it
//! may proceed at all:
//!
//! - **Authentication**: the [`Authenticator`] trait and its shared-secret
//!   implementation, [`SharedSecret`]
//! - **Admission**: [`Admission`] classifies a request as create, reuse,
//!   or reject; [`HostAllowlist`] guards session creation
//! - **Registry**: [`SessionRegistry`], the concurrent map of live sessions
//! - **Lifecycle**: [`SessionController`] creates sessions, binds each to
//!   its own engine, and removes them exactly once when they end
//!
//! # How it fits together
//!
//! ```text
//! Client request
//!     │
//!     ▼
//! Authenticator::authenticate()   ← credential from header or query
//!     │
//!     ▼
//! SessionController::resolve()
//!     ├── Create    → spawn engine → handshake → Resolution::Created
//!     ├── Reuse(id) → registry lookup         → Resolution::Resumed
//!     └── Reject    → SessionError::MissingSession
//! ```

#![allow(async_fn_in_trait)]

mod admission;
mod auth;
mod controller;
mod error;
mod registry;
mod session;

pub use admission::{Admission, HostAllowlist};
pub use auth::{Authenticator, SharedSecret, bearer_token, presented_credential};
pub use controller::{Resolution, SessionController};
pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::{InFlight, Session, SessionConfig, SessionState};
