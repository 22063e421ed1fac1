//! Performance device (kms-player) - main entry point
//!
//! Joins a performance on a kms-relay and, depending on role, renders the
//! song (stage), issues commands (controller) or only follows along
//! (viewer). Local commands are read line by line from stdin.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kms_common::events::{EventBus, KmsEvent};
use kms_player::audio::{AudioGraphEngine, CpalBackend};
use kms_player::config::DeviceConfig;
use kms_player::console::parse_command;
use kms_player::heartbeat::Heartbeat;
use kms_player::{Device, DeviceCommand, HttpTrackSource, Role, SessionChannel};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for kms-player
#[derive(Parser, Debug)]
#[command(name = "kms-player")]
#[command(about = "Karaoke performance device (stage, controller or viewer)")]
#[command(version)]
struct Args {
    /// Device role: stage, controller or viewer
    #[arg(short, long, env = "KMS_ROLE")]
    role: Option<Role>,

    /// Performance to join
    #[arg(short, long, env = "KMS_SESSION")]
    session: Option<String>,

    /// Relay WebSocket base URL
    #[arg(long, env = "KMS_RELAY_URL")]
    relay_url: Option<String>,

    /// Media server base URL
    #[arg(long, env = "KMS_MEDIA_URL")]
    media_url: Option<String>,

    /// Output device name
    #[arg(long, env = "KMS_AUDIO_DEVICE")]
    audio_device: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Path to TOML config file
    #[arg(short, long, env = "KMS_PLAYER_CONFIG")]
    config: Option<PathBuf>,
}

// cpal streams are not Send, so the device loop stays on one thread
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_devices {
        for name in CpalBackend::list_devices().context("Failed to enumerate audio devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config: DeviceConfig =
        kms_common::config::load_toml_config(args.config.as_deref(), "kms-player")
            .context("Failed to load player configuration")?;
    if let Some(role) = args.role {
        config.role = role;
    }
    if let Some(session) = args.session {
        config.session_id = session;
    }
    if let Some(url) = args.relay_url {
        config.relay_url = url;
    }
    if let Some(url) = args.media_url {
        config.media_base_url = url;
    }
    if args.audio_device.is_some() {
        config.audio_device = args.audio_device;
    }
    config.validate().context("Invalid configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("kms_player={}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting KMS player v{} as {} in performance {}",
        env!("CARGO_PKG_VERSION"),
        config.role,
        config.session_id
    );

    let engine = if config.role.has_audio() {
        let backend = CpalBackend::open(config.audio_device.as_deref())
            .context("Failed to open audio output")?;
        info!("Audio output: {}", backend.device_name());
        Some(AudioGraphEngine::new(Box::new(backend)))
    } else {
        None
    };

    let source = Arc::new(
        HttpTrackSource::new(config.media_base_url.clone(), config.fetch_timeout())
            .context("Failed to create media client")?,
    );
    let events = Arc::new(EventBus::new(256));
    let (channel, channel_events) =
        SessionChannel::connect(config.performance_url(), config.reconnect.policy());

    let device = Device::new(
        config.role,
        engine,
        Box::new(channel),
        source,
        Arc::clone(&events),
        Heartbeat::new(config.heartbeat_interval()),
    )
    .context("Failed to assemble device")?;

    let (commands_tx, commands_rx) = mpsc::channel(32);
    spawn_console(commands_tx.clone());
    tokio::spawn(quit_on_signal(commands_tx));
    tokio::spawn(print_events(events.subscribe()));

    device
        .run(commands_rx, channel_events)
        .await
        .context("Device loop failed")?;

    info!("Player shutdown complete");
    Ok(())
}

/// Read commands from stdin on a plain thread (stdin reads never yield)
fn spawn_console(commands: mpsc::Sender<DeviceCommand>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Ok(command) => {
                    if commands.blocking_send(command).is_err() {
                        return;
                    }
                }
                Err(e) => eprintln!("{}", e),
            }
        }
        let _ = commands.blocking_send(DeviceCommand::Quit);
    });
}

async fn quit_on_signal(commands: mpsc::Sender<DeviceCommand>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down");
            let _ = commands.send(DeviceCommand::Quit).await;
        }
        Err(e) => warn!("Failed to install Ctrl+C handler: {}", e),
    }
}

/// Show what the performance is doing on stdout
async fn print_events(mut rx: broadcast::Receiver<KmsEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        };
        match event {
            KmsEvent::ControlChanged { update, remote, .. } => {
                let (control, value) = update.to_wire();
                let origin = if remote { "remote" } else { "local" };
                println!("{:?} = {:?} ({})", control, value, origin);
            }
            KmsEvent::TransportStatusChanged { new_status, .. } => println!("[{}]", new_status),
            KmsEvent::SongLoaded { song_id, duration, .. } => {
                println!("loaded song {} ({:.1}s)", song_id, duration)
            }
            KmsEvent::SongLoadFailed { song_id, message, .. } => {
                println!("song {} failed: {}", song_id, message)
            }
            KmsEvent::SongEnded { song_id, .. } => println!("song {} ended", song_id),
            KmsEvent::ConnectionChanged { state, .. } => println!("relay: {:?}", state),
            KmsEvent::PlaybackProgress { .. } => {}
        }
    }
}
