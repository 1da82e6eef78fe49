//! The session lifecycle controller.
//!
//! Owns the registry and decides, per request, whether to create a new
//! session, reuse an existing one, or reject the request. Every way a
//! session can end (DELETE, client `close`, push stream dropped, idle
//! expiry, engine failure, server shutdown) goes through here, and each
//! one removes the registry entry exactly once.
//!
//! ```text
//!                  resolve()
//!                      │
//!          ┌───────────┼───────────────┐
//!       Create       Reuse(id)       Reject
//!          │           │               │
//!    host check     lookup()      MissingSession
//!    spawn engine      │
//!    insert()       Resumed
//!    handshake
//!    activate()
//!          │
//!       Created
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use toolgate_engine::{
    CloseReason, EngineExit, ExitSender, ToolBackend, spawn_engine,
};
use toolgate_protocol::{ClientMessage, InitializeResult, RequestEnvelope, SessionId};

use crate::{
    Admission, HostAllowlist, Session, SessionConfig, SessionError,
    SessionRegistry,
};

/// The outcome of resolving a request to a session.
#[derive(Debug)]
pub enum Resolution {
    /// A new session was opened by this request.
    Created {
        session: Arc<Session>,
        handshake: InitializeResult,
    },
    /// The request belongs to an existing, active session.
    Resumed(Arc<Session>),
}

impl Resolution {
    pub fn session(&self) -> &Arc<Session> {
        match self {
            Self::Created { session, .. } | Self::Resumed(session) => session,
        }
    }
}

/// Creates, resolves and closes sessions.
///
/// Built once per server and shared behind an `Arc`. Construction spawns
/// two background tasks (engine exit handling and, if enabled, the idle
/// sweep), so it must happen inside a Tokio runtime. Both tasks hold only
/// a `Weak` reference and stop once the controller is dropped.
pub struct SessionController<B: ToolBackend> {
    config: SessionConfig,
    hosts: HostAllowlist,
    backend: Arc<B>,
    registry: SessionRegistry,
    exits: ExitSender,
}

impl<B: ToolBackend> SessionController<B> {
    /// Creates a controller and starts its background tasks.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn new(config: SessionConfig, backend: Arc<B>) -> Arc<Self> {
        let (exits, exit_rx) = mpsc::unbounded_channel();
        let controller = Arc::new(Self {
            hosts: HostAllowlist::new(&config.allowed_hosts),
            config,
            backend,
            registry: SessionRegistry::new(),
            exits,
        });

        tokio::spawn(exit_loop(Arc::downgrade(&controller), exit_rx));

        if let Some(timeout) = controller.config.idle_timeout() {
            let every = Duration::from_secs(controller.config.reap_interval_secs.max(1));
            tracing::debug!(?timeout, ?every, "idle sweep enabled");
            tokio::spawn(reap_loop(Arc::downgrade(&controller), every));
        }

        controller
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.registry.len().await
    }

    // =====================================================================
    // Request resolution
    // =====================================================================

    /// Resolves a request to a session, creating one if the request is an
    /// initialization without a session id.
    ///
    /// `host` is the request's `Host` header, checked against the
    /// allowlist for initialization requests only.
    ///
    /// # Errors
    /// - [`SessionError::MissingSession`] for a non-initialize request
    ///   without a session id
    /// - [`SessionError::UnknownSession`] for an id that is not active
    /// - [`SessionError::HostNotAllowed`] for a disallowed `Host`
    /// - [`SessionError::ShuttingDown`] once shutdown has started
    /// - [`SessionError::HandshakeFailed`] if the engine handshake fails
    pub async fn resolve(
        &self,
        session_id: Option<&str>,
        host: Option<&str>,
        request: &RequestEnvelope,
    ) -> Result<Resolution, SessionError> {
        match Admission::classify(session_id, &request.message) {
            Admission::Create => {
                self.hosts.check(host)?;
                let client = match &request.message {
                    ClientMessage::Initialize { client } => client.clone(),
                    _ => None,
                };
                let (session, handshake) = self.create(client).await?;
                Ok(Resolution::Created { session, handshake })
            }
            Admission::Reuse(id) => Ok(Resolution::Resumed(self.session(&id).await?)),
            Admission::Reject => Err(SessionError::MissingSession),
        }
    }

    /// Looks up an active session and records activity on it.
    ///
    /// # Errors
    /// [`SessionError::UnknownSession`] if `id` is not active.
    pub async fn session(&self, id: &SessionId) -> Result<Arc<Session>, SessionError> {
        let session = self.registry.lookup(id).await?;
        session.touch();
        Ok(session)
    }

    async fn create(
        &self,
        client: Option<String>,
    ) -> Result<(Arc<Session>, InitializeResult), SessionError> {
        if !self.registry.is_accepting().await {
            return Err(SessionError::ShuttingDown);
        }

        let id = generate_session_id();
        let engine = spawn_engine(
            id.clone(),
            Arc::clone(&self.backend),
            &self.config.engine,
            self.exits.clone(),
        );
        let session = Arc::new(Session::new(id.clone(), engine));

        if let Err(e) = self.registry.insert(Arc::clone(&session)).await {
            session.engine().shutdown(CloseReason::HandshakeFailed).await;
            return Err(e);
        }

        let handshake = match session.engine().handshake(client).await {
            Ok(handshake) => handshake,
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "handshake failed");
                self.close(&id, CloseReason::HandshakeFailed).await;
                return Err(SessionError::HandshakeFailed(e.to_string()));
            }
        };

        if !self.registry.activate(&id).await {
            // Removed while the handshake ran; whoever removed it has
            // already stopped the engine.
            return Err(if self.registry.is_accepting().await {
                SessionError::HandshakeFailed("session closed during handshake".into())
            } else {
                SessionError::ShuttingDown
            });
        }

        tracing::info!(session_id = %id, "session created");
        Ok((session, handshake))
    }

    // =====================================================================
    // Closing sessions
    // =====================================================================

    /// Ends a session at the client's explicit request.
    ///
    /// # Errors
    /// [`SessionError::UnknownSession`] if `id` is not registered.
    pub async fn terminate(&self, id: &SessionId) -> Result<(), SessionError> {
        if self.close(id, CloseReason::Terminated).await {
            Ok(())
        } else {
            Err(SessionError::UnknownSession(id.clone()))
        }
    }

    /// Ends a session whose push stream went away. No-op if it is
    /// already gone.
    pub async fn disconnect(&self, id: &SessionId) {
        self.close(id, CloseReason::Disconnected).await;
    }

    /// Handles an engine's exit report: removes its session if it is
    /// still registered.
    ///
    /// Every engine reports exactly once, including engines stopped by
    /// this controller, so most calls find the entry already gone.
    pub async fn on_close(&self, exit: EngineExit) {
        if self.registry.remove(&exit.session_id).await.is_some() {
            tracing::info!(
                session_id = %exit.session_id,
                reason = %exit.reason,
                "session closed by engine"
            );
        }
    }

    /// Closes every session idle for longer than the configured timeout.
    ///
    /// Sessions with an open push stream or a request in flight are never
    /// considered idle.
    /// Returns the ids that were closed.
    pub async fn reap_idle(&self) -> Vec<SessionId> {
        let Some(timeout) = self.config.idle_timeout() else {
            return Vec::new();
        };

        let mut reaped = Vec::new();
        for id in self.registry.idle_longer_than(timeout).await {
            // Re-checked under the registry lock: a request may have
            // arrived since the listing.
            let Some(session) = self.registry.remove_idle(&id, timeout).await else {
                continue;
            };
            session.engine().shutdown(CloseReason::IdleTimeout).await;
            tracing::info!(session_id = %id, reason = %CloseReason::IdleTimeout, "session closed");
            reaped.push(id);
        }
        if !reaped.is_empty() {
            tracing::info!(count = reaped.len(), "reaped idle sessions");
        }
        reaped
    }

    /// Stops creating sessions and closes every existing one, waiting for
    /// each engine to stop. Returns how many sessions were closed.
    pub async fn shutdown(&self) -> usize {
        let sessions = self.registry.close().await;
        let count = sessions.len();
        tracing::info!(sessions = count, "closing all sessions");

        let mut engines = JoinSet::new();
        for session in sessions {
            engines.spawn(async move {
                session.engine().shutdown(CloseReason::ServerShutdown).await;
            });
        }
        while let Some(result) = engines.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "engine shutdown task failed");
            }
        }

        count
    }

    /// Removes `id` and stops its engine. Returns `false` if it was
    /// already gone.
    async fn close(&self, id: &SessionId, reason: CloseReason) -> bool {
        let Some(session) = self.registry.remove(id).await else {
            return false;
        };
        session.engine().shutdown(reason).await;
        tracing::info!(session_id = %id, %reason, "session closed");
        true
    }
}

/// Feeds engine exit reports to [`SessionController::on_close`].
async fn exit_loop<B: ToolBackend>(
    controller: Weak<SessionController<B>>,
    mut exits: mpsc::UnboundedReceiver<EngineExit>,
) {
    while let Some(exit) = exits.recv().await {
        let Some(controller) = controller.upgrade() else {
            break;
        };
        controller.on_close(exit).await;
    }
}

/// Runs [`SessionController::reap_idle`] every `every` until shutdown.
async fn reap_loop<B: ToolBackend>(controller: Weak<SessionController<B>>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(controller) = controller.upgrade() else {
            break;
        };
        if !controller.registry.is_accepting().await {
            break;
        }
        controller.reap_idle().await;
    }
}

/// Generates a random 32-character hex session id (128 bits).
fn generate_session_id() -> SessionId {
    let bytes: [u8; 16] = rand::rng().random();
    SessionId::new(bytes.iter().map(|b| format!("{b:02x}")).collect::<String>())
}

// =========================================================================
// Tests
// =========================================================================
