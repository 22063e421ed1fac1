//! Performance relay (kms-relay) - main entry point
//!
//! Accepts device connections, answers joins with a full snapshot of the
//! performance, and rebroadcasts control intents and heartbeats to the other
//! members.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kms_relay::config::RelayConfig;
use kms_relay::{build_router, AppState, SessionRegistry};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for kms-relay
#[derive(Parser, Debug)]
#[command(name = "kms-relay")]
#[command(about = "Performance relay for synchronized karaoke devices")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "KMS_RELAY_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "KMS_RELAY_BIND")]
    bind: Option<String>,

    /// Path to TOML config file
    #[arg(short, long, env = "KMS_RELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config: RelayConfig = kms_common::config::load_toml_config(args.config.as_deref(), "kms-relay")
        .context("Failed to load relay configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("kms_relay={},tower_http=info", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting KMS relay v{}", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(
        SessionRegistry::new(config.broadcast_capacity).with_idle_ttl(config.idle_room_ttl()),
    );
    registry.spawn_idle_sweeper(config.idle_sweep_period());
    let app = build_router(AppState::new(registry));

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .context("Invalid bind address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Relay shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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
