//! `toolgate`: serve the demo tools over the session-managed HTTP transport.

mod tools;

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use toolgate::{EngineConfig, SessionConfig, ToolgateServer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::tools::DemoTools;

#[derive(Debug, Parser)]
#[command(name = "toolgate", version, about = "Session-managed HTTP tool server")]
struct Cli {
    /// Bind address (e.g., 127.0.0.1:8080)
    #[arg(long, env = "TOOLGATE_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Path of the session endpoint
    #[arg(long, env = "TOOLGATE_ENDPOINT", default_value = toolgate::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Shared secret clients must present (Bearer header or `token` query
    /// parameter). Unset or empty disables authentication.
    #[arg(long, env = "TOOLGATE_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Allowed Host header values for new sessions (comma-separated).
    /// Pass an empty string to allow any host.
    #[arg(
        long,
        env = "TOOLGATE_ALLOWED_HOSTS",
        value_delimiter = ',',
        default_value = "localhost,127.0.0.1,[::1]"
    )]
    allowed_hosts: Vec<String>,

    /// Close sessions idle for this many seconds (0 disables)
    #[arg(long, env = "TOOLGATE_IDLE_TIMEOUT", default_value_t = 1800)]
    idle_timeout_secs: u64,

    /// How often to look for idle sessions, in seconds
    #[arg(long, default_value_t = 60)]
    reap_interval_secs: u64,

    /// SSE keep-alive interval in seconds (0 disables)
    #[arg(long, default_value_t = 15)]
    sse_keep_alive_secs: u64,
}

impl Cli {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            allowed_hosts: self.allowed_hosts.clone(),
            idle_timeout_secs: self.idle_timeout_secs,
            reap_interval_secs: self.reap_interval_secs,
            engine: EngineConfig::default(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays free for piping.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("toolgate=info")))
        .init();

    let cli = Cli::parse();

    let mut builder = ToolgateServer::builder()
        .bind(&cli.bind)
        .endpoint(&cli.endpoint)
        .session_config(cli.session_config())
        .sse_keep_alive(Duration::from_secs(cli.sse_keep_alive_secs));
    if let Some(secret) = &cli.secret {
        builder = builder.shared_secret(secret.clone());
    }

    let server = builder
        .build(DemoTools)
        .await
        .with_context(|| format!("failed to start server on {}", cli.bind))?;

    let addr = server.local_addr()?;
    info!(
        %addr,
        endpoint = server.endpoint(),
        auth = cli.secret.as_deref().is_some_and(|s| !s.is_empty()),
        "serving demo tools"
    );

    let handle = server.shutdown_handle();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => tracing::warn!(error = %e, "signal handler failed; shutting down"),
        }
        handle.shutdown();
    });

    server.run().await?;
    Ok(())
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}
