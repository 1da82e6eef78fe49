//! The session registry: every live session, keyed by id.
//!
//! The registry is the only place a session's [`SessionState`] changes.
//! Every state change happens under the registry's write lock, so a
//! request can never resolve a session that is half-removed, and a
//! shutdown drain can never miss a session that is being inserted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use toolgate_protocol::SessionId;

use crate::{Session, SessionError, SessionState};

#[derive(Debug)]
struct Inner {
    sessions: HashMap<SessionId, Arc<Session>>,
    /// Cleared by [`SessionRegistry::close`]. Inserts fail afterwards.
    accepting: bool,
}

/// Concurrent map of session id → session.
///
/// ## Lifecycle
///
/// ```text
/// insert() ──→ [Initializing] ──activate()──→ [Active] ──remove()──→ [Closed]
///                    │                                                  ↑
///                    └──────────────remove() / close()──────────────────┘
/// ```
#[derive(Debug)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                sessions: HashMap::new(),
                accepting: true,
            }),
        }
    }

    /// Registers a new session in the `Initializing` state.
    ///
    /// # Errors
    /// - [`SessionError::ShuttingDown`] after [`close`](Self::close)
    /// - [`SessionError::DuplicateSession`] if the id is taken
    pub async fn insert(&self, session: Arc<Session>) -> Result<(), SessionError> {
        let mut inner = self.inner.write().await;
        if !inner.accepting {
            return Err(SessionError::ShuttingDown);
        }
        if inner.sessions.contains_key(session.id()) {
            return Err(SessionError::DuplicateSession(session.id().clone()));
        }
        inner.sessions.insert(session.id().clone(), session);
        Ok(())
    }

    /// Moves a registered session from `Initializing` to `Active`.
    ///
    /// Returns `false` if the session is gone (closed during its
    /// handshake) or was already active.
    pub async fn activate(&self, id: &SessionId) -> bool {
        let inner = self.inner.write().await;
        match inner.sessions.get(id) {
            Some(session) if session.state() == SessionState::Initializing => {
                session.set_state(SessionState::Active);
                true
            }
            _ => false,
        }
    }

    /// Resolves an id to its session.
    ///
    /// Only `Active` sessions resolve. A session still in its handshake,
    /// or one that was removed, is reported as unknown.
    pub async fn lookup(&self, id: &SessionId) -> Result<Arc<Session>, SessionError> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(id)
            .filter(|s| s.state() == SessionState::Active)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSession(id.clone()))
    }

    /// Removes a session and marks it `Closed`.
    ///
    /// Idempotent: returns `None` if the session was already removed, so
    /// exactly one caller ever gets `Some` for a given id.
    pub async fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.remove(id)?;
        session.set_state(SessionState::Closed);
        Some(session)
    }

    /// Stops accepting new sessions and removes every existing one.
    ///
    /// Returns the removed sessions, all marked `Closed`. Calling it again
    /// returns an empty list.
    pub async fn close(&self) -> Vec<Arc<Session>> {
        let mut inner = self.inner.write().await;
        inner.accepting = false;
        inner
            .sessions
            .drain()
            .map(|(_, session)| {
                session.set_state(SessionState::Closed);
                session
            })
            .collect()
    }

    /// Ids of `Active` sessions idle for longer than `timeout` with no
    /// push stream attached and no request in flight.
    pub async fn idle_longer_than(&self, timeout: Duration) -> Vec<SessionId> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .values()
            .filter(|s| s.state() == SessionState::Active && s.is_idle_for(timeout))
            .map(|s| s.id().clone())
            .collect()
    }

    /// Removes a session only if it is still idle for longer than
    /// `timeout`, checked under the write lock.
    ///
    /// A session that saw activity after [`idle_longer_than`](Self::idle_longer_than)
    /// listed it stays registered.
    pub async fn remove_idle(&self, id: &SessionId, timeout: Duration) -> Option<Arc<Session>> {
        let mut inner = self.inner.write().await;
        if !inner.sessions.get(id)?.is_idle_for(timeout) {
            return None;
        }
        let session = inner.sessions.remove(id)?;
        session.set_state(SessionState::Closed);
        Some(session)
    }

    /// Number of registered sessions, in any non-closed state.
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }

    /// Ids of every registered session.
    pub async fn ids(&self) -> Vec<SessionId> {
        self.inner.read().await.sessions.keys().cloned().collect()
    }

    /// `false` once [`close`](Self::close) has run.
    pub async fn is_accepting(&self) -> bool {
        self.inner.read().await.accepting
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================
