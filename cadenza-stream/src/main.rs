//! Cadenza streaming service - main entry point
//!
//! Scans the media library, then serves the control WebSocket endpoint and
//! the dedicated audio stream endpoint until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadenza_stream::config::Config;
use cadenza_stream::library::{MemoryIndex, PathGuard};
use cadenza_stream::net::control::AppContext;
use cadenza_stream::net::registry::SessionRegistry;
use cadenza_stream::net::{control, stream};

/// Command-line arguments for cadenza-stream
#[derive(Parser, Debug)]
#[command(name = "cadenza-stream")]
#[command(about = "Music streaming service for the Cadenza assistant")]
#[command(version)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CADENZA_CONFIG")]
    config: Option<PathBuf>,

    /// Control channel port (overrides config)
    #[arg(short, long, env = "CADENZA_PORT")]
    port: Option<u16>,

    /// Dedicated stream channel port (overrides config)
    #[arg(long, env = "CADENZA_STREAM_PORT")]
    stream_port: Option<u16>,

    /// Root folder of the media library (overrides config)
    #[arg(short, long, env = "CADENZA_MEDIA_ROOT")]
    media_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config file first, CLI/env overrides second.
    let mut config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(stream_port) = args.stream_port {
        config.stream_port = Some(stream_port);
    }
    if let Some(media_root) = args.media_root {
        config.media_root = Some(media_root);
    }

    // Initialize tracing; RUST_LOG wins over the configured level.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "cadenza_stream={0},tower_http={0}",
                    config.logging.level
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Cadenza streaming service on port {}", config.port);

    let media_root = config
        .media_root
        .clone()
        .context("No media root configured (set media_root or --media-root)")?;
    let guard = PathGuard::new(&media_root).context("Failed to resolve media root")?;
    info!("Media root: {}", guard.root().display());

    let index = MemoryIndex::scan(guard.root()).context("Failed to scan media library")?;

    let ctx = AppContext {
        config: Arc::new(config.clone()),
        index: Arc::new(index),
        guard: Arc::new(guard),
        registry: SessionRegistry::new(),
    };

    let control_server = control::run(ctx.clone(), config.port);
    let stream_server = stream::run(ctx.clone(), config.stream_port());

    tokio::select! {
        result = control_server => result.context("Control server error")?,
        result = stream_server => result.context("Stream server error")?,
        _ = shutdown_signal() => {
            info!("Shutdown complete");
        }
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
