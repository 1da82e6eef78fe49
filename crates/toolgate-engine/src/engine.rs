//! Engine actor: an isolated Tokio task that owns one session's protocol state.
//!
//! Each session gets its own engine, running in its own task and reached
//! only through an mpsc mailbox. The actor handles one command at a time,
//! so two requests for the same session can never run against the engine
//! concurrently, however many HTTP handlers are waiting on it.

use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot};
use toolgate_protocol::{
    ClientMessage, InitializeResult, Notification, PROTOCOL_VERSION,
    RequestEnvelope, ResponseEnvelope, SessionId,
};

use crate::{EngineConfig, EngineError, ToolBackend};

/// Why an engine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent an explicit termination (HTTP `DELETE`).
    Terminated,
    /// The client sent a `close` message through the engine itself.
    ClientClosed,
    /// The client's push stream went away.
    Disconnected,
    /// No activity for longer than the configured idle timeout.
    IdleTimeout,
    /// The whole server is shutting down.
    ServerShutdown,
    /// The initialization handshake did not complete.
    HandshakeFailed,
    /// Every handle to the engine was dropped without a shutdown.
    Abandoned,
    /// The actor task ended abnormally (e.g. the backend panicked).
    EngineFailed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Terminated => "terminated",
            Self::ClientClosed => "closed by client",
            Self::Disconnected => "client disconnected",
            Self::IdleTimeout => "idle timeout",
            Self::ServerShutdown => "server shutdown",
            Self::HandshakeFailed => "handshake failed",
            Self::Abandoned => "abandoned",
            Self::EngineFailed => "engine failed",
        };
        f.write_str(s)
    }
}

/// Reported once by every engine when its task ends, for any reason.
///
/// The session controller consumes these to deregister the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineExit {
    pub session_id: SessionId,
    pub reason: CloseReason,
}

/// Where engines report their exit.
pub type ExitSender = mpsc::UnboundedSender<EngineExit>;

/// Commands sent to an engine actor through its mailbox.
///
/// Variants carrying a `oneshot::Sender` expect a reply; the caller
/// awaits the matching receiver.
pub(crate) enum EngineCommand {
    /// Run the initialization handshake.
    Handshake {
        client: Option<String>,
        reply: oneshot::Sender<Result<InitializeResult, EngineError>>,
    },

    /// Process one client request.
    Dispatch {
        request: RequestEnvelope,
        reply: oneshot::Sender<ResponseEnvelope>,
    },

    /// Open a new notification subscription.
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<Notification>>,
    },

    /// Stop the engine. The reply fires after subscribers are released.
    Shutdown {
        reason: CloseReason,
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running engine actor.
///
/// Cheap to clone: it's an `mpsc::Sender` plus the session id. The
/// session registry stores one per session.
#[derive(Clone)]
pub struct EngineHandle {
    session_id: SessionId,
    sender: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    /// The session this engine belongs to.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Runs the initialization handshake.
    ///
    /// # Errors
    /// [`EngineError::AlreadyInitialized`] on a second handshake,
    /// [`EngineError::Unavailable`] if the actor is gone.
    pub async fn handshake(
        &self,
        client: Option<String>,
    ) -> Result<InitializeResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::Handshake {
                client,
                reply: reply_tx,
            })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())?
    }

    /// Sends one request to the engine and waits for its response.
    ///
    /// Tool failures come back as `Ok` with an error payload. `Err` only
    /// means the engine itself is gone.
    pub async fn dispatch(
        &self,
        request: RequestEnvelope,
    ) -> Result<ResponseEnvelope, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::Dispatch {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Subscribes to the engine's push notifications.
    ///
    /// The receiver yields `RecvError::Closed` once the engine stops.
    pub async fn subscribe(
        &self,
    ) -> Result<broadcast::Receiver<Notification>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::Subscribe { reply: reply_tx })
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Stops the engine and waits until it has released its subscribers.
    ///
    /// Stopping an engine that already stopped is a no-op.
    pub async fn shutdown(&self, reason: CloseReason) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .sender
            .send(EngineCommand::Shutdown {
                reason,
                reply: reply_tx,
            })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    /// Returns `true` once the actor has stopped receiving commands.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn unavailable(&self) -> EngineError {
        EngineError::Unavailable(self.session_id.clone())
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("session_id", &self.session_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Drop guard that reports the engine's exit.
///
/// Lives inside the actor task, so the exit is reported even if the
/// backend panics and the task unwinds.
struct ExitGuard {
    session_id: SessionId,
    reason: CloseReason,
    exits: ExitSender,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.exits.send(EngineExit {
            session_id: self.session_id.clone(),
            reason: self.reason,
        });
    }
}

/// The internal engine state. Runs inside a Tokio task.
struct EngineActor<B: ToolBackend> {
    session_id: SessionId,
    backend: Arc<B>,
    server_name: String,
    server_version: String,
    initialized: bool,
    client: Option<String>,
    calls: u64,
    notifications: broadcast::Sender<Notification>,
    receiver: mpsc::Receiver<EngineCommand>,
}

impl<B: ToolBackend> EngineActor<B> {
    /// Runs the actor loop until shutdown, `close`, or all handles drop.
    async fn run(mut self, mut guard: ExitGuard) {
        tracing::debug!(session_id = %self.session_id, "engine started");

        let mut stopped_by = None;
        let mut shutdown_reply = None;

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                EngineCommand::Handshake { client, reply } => {
                    let _ = reply.send(self.handle_handshake(client));
                }
                EngineCommand::Dispatch { request, reply } => {
                    let closing = self.initialized
                        && matches!(request.message, ClientMessage::Close);
                    let response = self.handle_request(request).await;
                    let _ = reply.send(response);
                    if closing {
                        stopped_by = Some(CloseReason::ClientClosed);
                        break;
                    }
                }
                EngineCommand::Subscribe { reply } => {
                    let _ = reply.send(self.notifications.subscribe());
                }
                EngineCommand::Shutdown { reason, reply } => {
                    stopped_by = Some(reason);
                    shutdown_reply = Some(reply);
                    break;
                }
            }
        }

        guard.reason = stopped_by.unwrap_or(CloseReason::Abandoned);
        let _ = self.notifications.send(Notification::SessionClosed {
            reason: guard.reason.to_string(),
        });
        tracing::info!(
            session_id = %self.session_id,
            reason = %guard.reason,
            calls = self.calls,
            "engine stopped"
        );

        // Release the mailbox and the notification sender before
        // acknowledging, so a finished `shutdown()` implies every push
        // stream has seen the channel close.
        drop(self);
        drop(guard);
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    fn handle_handshake(
        &mut self,
        client: Option<String>,
    ) -> Result<InitializeResult, EngineError> {
        if self.initialized {
            return Err(EngineError::AlreadyInitialized);
        }
        self.initialized = true;
        self.client = client;
        tracing::info!(
            session_id = %self.session_id,
            client = self.client.as_deref().unwrap_or("unknown"),
            "handshake complete"
        );

        Ok(InitializeResult {
            protocol_version: PROTOCOL_VERSION,
            server_name: self.server_name.clone(),
            server_version: self.server_version.clone(),
        })
    }

    async fn handle_request(&mut self, request: RequestEnvelope) -> ResponseEnvelope {
        let RequestEnvelope { id, message } = request;

        if !self.initialized {
            return ResponseEnvelope::error(id, EngineError::NotInitialized.to_body());
        }

        let outcome = match message {
            ClientMessage::Initialize { .. } => Err(EngineError::AlreadyInitialized),
            ClientMessage::Call { tool, arguments } => {
                self.call_tool(tool, arguments).await
            }
            ClientMessage::ListTools => Ok(json!({ "tools": self.backend.list_tools() })),
            ClientMessage::Ping => Ok(json!({})),
            ClientMessage::Close => Ok(json!({ "closed": true })),
        };

        match outcome {
            Ok(result) => ResponseEnvelope::result(id, result),
            Err(e) => ResponseEnvelope::error(id, e.to_body()),
        }
    }

    async fn call_tool(
        &mut self,
        tool: String,
        arguments: Value,
    ) -> Result<Value, EngineError> {
        self.calls += 1;
        let result = self.backend.execute(&tool, arguments).await;

        // Nobody listening is fine; `send` only fails without receivers.
        let notification = match &result {
            Ok(_) => {
                tracing::debug!(session_id = %self.session_id, %tool, "tool completed");
                Notification::ToolCompleted { tool }
            }
            Err(e) => {
                tracing::debug!(session_id = %self.session_id, %tool, error = %e, "tool failed");
                Notification::ToolFailed {
                    tool,
                    message: e.to_string(),
                }
            }
        };
        let _ = self.notifications.send(notification);

        result.map_err(EngineError::from)
    }
}

/// Spawns a new engine actor for `session_id` and returns its handle.
///
/// When the actor stops, an [`EngineExit`] is sent on `exits`.
pub fn spawn_engine<B: ToolBackend>(
    session_id: SessionId,
    backend: Arc<B>,
    config: &EngineConfig,
    exits: ExitSender,
) -> EngineHandle {
    let (tx, rx) = mpsc::channel(config.mailbox_size.max(1));
    let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));

    let guard = ExitGuard {
        session_id: session_id.clone(),
        reason: CloseReason::EngineFailed,
        exits,
    };

    let actor = EngineActor {
        session_id: session_id.clone(),
        backend,
        server_name: config.server_name.clone(),
        server_version: config.server_version.clone(),
        initialized: false,
        client: None,
        calls: 0,
        notifications,
        receiver: rx,
    };

    tokio::spawn(actor.run(guard));

    EngineHandle {
        session_id,
        sender: tx,
    }
}
