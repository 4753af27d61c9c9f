//! Standalone ABR session daemon
//!
//! Wires the session manager, ffmpeg supervisor, and HTTP surface
//! together from a TOML config file:
//!
//! ```text
//! abrd [config-path]      (default: /etc/abrd/abrd.toml)
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use abr_server::{routes::abr_router, MemoryCatalog, SessionManager};
use anyhow::{Context, Result};
use encoder_supervisor::FfmpegSupervisor;
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

const DEFAULT_CONFIG_PATH: &str = "/etc/abrd/abrd.toml";
const MONITOR_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = DaemonConfig::read_from_file(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    encoder_supervisor::check_dependencies()
        .await
        .context("ffmpeg is required on PATH")?;

    let catalog = Arc::new(MemoryCatalog::new());
    for (stream_id, ladder) in &config.streams {
        catalog.insert(stream_id, ladder.clone()).await;
    }
    tracing::info!(streams = config.streams.len(), "catalog loaded");

    let (supervisor, events) = FfmpegSupervisor::new(config.supervisor);
    supervisor.spawn_monitor(MONITOR_INTERVAL);

    let manager = SessionManager::new(catalog, supervisor, config.policy, config.server);
    manager.spawn_health_loop(events);

    let app = abr_router(Arc::clone(&manager));
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(bind = %config.bind, "ABR session daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down, stopping all sessions");
    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
