//! outpost listener entry point.
//!
//! Initialises tracing, loads one listener's configuration from
//! `OUTPOST_*` environment variables, starts it against an in-process
//! teamserver, logs every broadcast event, and stops on Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use outpost_listener::{HttpListener, ListenerConfig, StopOutcome, Teamserver};

// ===================================================================
// Configuration
// ===================================================================

/// Process settings outside the listener itself, loaded via `envy`.
///
/// The listener fields map to `OUTPOST_<FIELD>`:
///   - `OUTPOST_NAME`      (required)
///   - `OUTPOST_HOSTS`     (required, comma-separated)
///   - `OUTPOST_HOST_BIND` (optional, defaults to the first host)
///   - `OUTPOST_PORT`      (required)
///   - `OUTPOST_URIS`      (required, comma-separated)
///   - `OUTPOST_SECURE`    (default `false`)
///   - `OUTPOST_HEADERS`   (optional, comma-separated `Key: Value`)
///   - `OUTPOST_DATA_DIR`  (default `data/listeners`)
#[derive(Debug, Deserialize)]
struct Settings {
    /// Root under which per-listener TLS directories are created.
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/listeners")
}

// ===================================================================
// Entry point
// ===================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing::info!("outpost-listener starting");

    let config: ListenerConfig = envy::prefixed("OUTPOST_")
        .from_env()
        .context("failed to load listener config from OUTPOST_* env vars")?;
    let settings: Settings = envy::prefixed("OUTPOST_")
        .from_env()
        .context("failed to load settings from OUTPOST_* env vars")?;

    tracing::info!(
        name = %config.name,
        hosts = ?config.hosts,
        port = ?config.port,
        secure = config.secure,
        data_dir = %settings.data_dir.display(),
        "configuration loaded",
    );

    let teamserver = Arc::new(Teamserver::new());
    tokio::spawn(log_events(Arc::clone(&teamserver)));

    let listener = HttpListener::new(config, teamserver, settings.data_dir)
        .context("invalid listener configuration")?;
    listener.start().await.context("failed to start listener")?;

    match listener.local_addr().await {
        Some(addr) => tracing::info!(%addr, "listener ready"),
        None => tracing::warn!("listener did not bind; see the listener error event"),
    }

    shutdown_signal().await;

    match listener.stop().await.context("failed to stop listener")? {
        StopOutcome::Graceful => tracing::info!("outpost-listener shut down"),
        StopOutcome::TimedOut => tracing::warn!("outpost-listener shut down after grace period"),
    }
    Ok(())
}

/// Log every broadcast event as one JSON line.
async fn log_events(teamserver: Arc<Teamserver>) {
    let mut events = teamserver.subscribe();
    drop(teamserver);
    loop {
        match events.recv().await {
            Ok(package) => match serde_json::to_string(&package) {
                Ok(json) => tracing::info!(target: "outpost::events", "{json}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialise event"),
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event log lagged behind broadcast");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Wait for SIGINT (Ctrl-C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl-C handler");
        return;
    }
    tracing::info!("received shutdown signal");
}
