//! `ToolgateServer` builder and serve loop.
//!
//! This is the entry point for running a toolgate server. It ties together
//! all the layers: transport → auth → session → engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use toolgate_engine::ToolBackend;
use toolgate_session::{Authenticator, SessionConfig, SessionController, SharedSecret};
use toolgate_transport::HttpListener;

use crate::ToolgateError;
use crate::handler::{self, AppState};
use crate::shutdown::{ShutdownHandle, drain_on_cancel};

/// Default path of the session endpoint.
pub const DEFAULT_ENDPOINT: &str = "/mcp";

/// Default interval between SSE keep-alive comments.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Builder for configuring and starting a toolgate server.
///
/// # Example
///
/// ```rust,ignore
/// use toolgate::prelude::*;
///
/// let server = ToolgateServer::builder()
///     .bind("127.0.0.1:8080")
///     .shared_secret("s3cret")
///     .build(MyTools)
///     .await?;
/// server.run().await
/// ```
pub struct ToolgateServerBuilder {
    bind_addr: String,
    endpoint: String,
    secret: Option<String>,
    session_config: SessionConfig,
    keep_alive: Duration,
}

impl ToolgateServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            secret: None,
            session_config: SessionConfig::default(),
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the path of the session endpoint. A missing leading `/` is
    /// added.
    pub fn endpoint(mut self, path: &str) -> Self {
        self.endpoint = path.to_string();
        self
    }

    /// Requires every request to present this secret. An empty string
    /// leaves authentication off.
    pub fn shared_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the SSE keep-alive interval. Zero disables keep-alives.
    pub fn sse_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Binds the listener and builds the server, authenticating with the
    /// configured shared secret (if any).
    ///
    /// # Errors
    /// [`ToolgateError::Transport`] if the address cannot be bound,
    /// [`ToolgateError::InvalidConfig`] for an unusable endpoint path.
    pub async fn build<B: ToolBackend>(self, backend: B) -> Result<ToolgateServer, ToolgateError> {
        let auth = SharedSecret::new(self.secret.clone());
        self.build_with_auth(backend, auth).await
    }

    /// Like [`build`](Self::build), with a custom [`Authenticator`].
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn build_with_auth<B, A>(
        self,
        backend: B,
        auth: A,
    ) -> Result<ToolgateServer, ToolgateError>
    where
        B: ToolBackend,
        A: Authenticator,
    {
        let endpoint = normalize_endpoint(&self.endpoint)?;
        let listener = HttpListener::bind(&self.bind_addr).await?;

        let controller = SessionController::new(self.session_config, Arc::new(backend));
        let state = AppState {
            controller: Arc::clone(&controller),
            auth: Arc::new(auth),
            keep_alive: self.keep_alive,
        };
        let router = handler::router(state, &endpoint);

        let token = CancellationToken::new();
        let drain = drain_on_cancel(controller, token.clone()).boxed();

        Ok(ToolgateServer {
            listener,
            router,
            endpoint,
            token,
            drain,
        })
    }
}

impl Default for ToolgateServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound toolgate server.
///
/// Call [`run()`](Self::run) to start serving.
pub struct ToolgateServer {
    listener: HttpListener,
    router: axum::Router,
    endpoint: String,
    token: CancellationToken,
    /// Closes every session once `token` fires.
    drain: BoxFuture<'static, usize>,
}

impl ToolgateServer {
    /// Creates a new builder.
    pub fn builder() -> ToolgateServerBuilder {
        ToolgateServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ToolgateError> {
        Ok(self.listener.local_addr()?)
    }

    /// The session endpoint path, e.g. `/mcp`.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns a handle that stops this server. Take it before calling
    /// [`run`](Self::run).
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.token.clone())
    }

    /// Serves requests until the shutdown handle fires.
    ///
    /// On shutdown the listener stops accepting, every session is closed
    /// (ending open push streams), and the future resolves once in-flight
    /// requests have finished. The registry is empty afterwards.
    pub async fn run(self) -> Result<(), ToolgateError> {
        let Self {
            listener,
            router,
            endpoint,
            token,
            drain,
        } = self;

        tracing::info!(%endpoint, "toolgate server running");
        let drain = tokio::spawn(drain);

        let served = listener.serve(router, token.clone()).await;

        // A serve error ends the loop without a shutdown request; sessions
        // still have to be closed.
        token.cancel();
        match drain.await {
            Ok(closed) => tracing::info!(sessions = closed, "toolgate server stopped"),
            Err(e) => tracing::warn!(error = %e, "session drain task failed"),
        }

        served.map_err(ToolgateError::from)
    }
}

/// Validates the endpoint path, adding a leading `/` if missing.
fn normalize_endpoint(path: &str) -> Result<String, ToolgateError> {
    let path = path.trim();
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if path == "/health" {
        return Err(ToolgateError::InvalidConfig(
            "endpoint cannot be /health".into(),
        ));
    }
    if path.contains(['{', '}', '*']) {
        return Err(ToolgateError::InvalidConfig(format!(
            "endpoint must be a literal path, got {path:?}"
        )));
    }
    Ok(path)
}
