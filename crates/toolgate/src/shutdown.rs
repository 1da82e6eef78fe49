//! Shutdown coordination.
//!
//! Stopping a server is two jobs that run off the same signal:
//!
//! ```text
//! ShutdownHandle::shutdown()
//!        │  (cancels the token)
//!        ├──→ serve loop stops accepting, waits for in-flight requests
//!        └──→ drain: registry closed, every engine stopped
//!                    └──→ push streams end, so the serve loop can finish
//! ```
//!
//! Without the drain, an open event stream would keep the serve loop
//! waiting forever.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use toolgate_engine::ToolBackend;
use toolgate_session::SessionController;

/// Asks a running [`ToolgateServer`](crate::ToolgateServer) to stop.
///
/// Cheap to clone. Calling [`shutdown`](Self::shutdown) more than once is
/// harmless.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Starts a graceful shutdown.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("shutdown requested");
        }
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Waits for `token`, then closes every session. Returns how many were
/// closed.
pub(crate) async fn drain_on_cancel<B: ToolBackend>(
    controller: Arc<SessionController<B>>,
    token: CancellationToken,
) -> usize {
    token.cancelled().await;
    tracing::info!("draining sessions");
    let closed = controller.shutdown().await;
    tracing::info!(sessions = closed, "sessions drained");
    closed
}
