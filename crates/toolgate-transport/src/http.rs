//! HTTP transport: a bound TCP listener driving an axum [`Router`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{RequestId, TransportError};

/// Counter for generating request ids.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// A bound HTTP listener, not yet serving.
///
/// Binding and serving are split so the caller learns about a bad bind
/// address before anything else starts, and so tests can bind to port 0
/// and read the real port back with [`local_addr`](Self::local_addr).
pub struct HttpListener {
    listener: TcpListener,
}

impl HttpListener {
    /// Binds a listener to the given address.
    ///
    /// # Errors
    /// Returns [`TransportError::Bind`] if the socket cannot be bound.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            TransportError::Bind {
                addr: addr.to_string(),
                source,
            }
        })?;
        tracing::info!(addr, "HTTP transport listening");
        Ok(Self { listener })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener.local_addr().map_err(TransportError::LocalAddr)
    }

    /// Serves `router` until `shutdown` is cancelled.
    ///
    /// Once the token fires the listener stops accepting connections and
    /// the future resolves after in-flight requests (including open event
    /// streams) have finished.
    pub async fn serve(
        self,
        router: Router,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError> {
        let app = router.layer(axum::middleware::from_fn(tag_request));
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(TransportError::Serve)?;
        tracing::info!("HTTP transport stopped");
        Ok(())
    }
}

/// Middleware that stamps every request with a fresh [`RequestId`].
///
/// Handlers read it back from the request extensions for log fields.
async fn tag_request(mut request: Request, next: Next) -> Response {
    let id = RequestId::new(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed));
    tracing::trace!(%id, method = %request.method(), uri = %request.uri(), "request received");
    request.extensions_mut().insert(id);
    next.run(request).await
}
