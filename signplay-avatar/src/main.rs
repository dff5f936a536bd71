//! Sign player (signplay-avatar) - Main entry point
//!
//! Plays a list of sign identifiers against a directory of clips, logging
//! every lifecycle hook and queue event, then prints the final queue status
//! as JSON.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use signplay_avatar::config::RuntimeSettings;
use signplay_avatar::playback::LoggingHooks;
use signplay_avatar::video::{FsVideoLoader, PathTemplateResolver};
use signplay_avatar::{AvatarStateMachine, ResourcePool, SignOptions, SignQueue};
use signplay_common::config::TomlConfig;
use signplay_common::events::{EventBus, SignEvent, SpeedMode};
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "signplay_avatar=debug,signplay_common=info";

/// Command-line arguments for signplay-avatar
#[derive(Parser, Debug)]
#[command(name = "signplay-avatar")]
#[command(about = "Play a sequence of sign clips through the avatar state machine")]
#[command(version)]
struct Args {
    /// Configuration file (overrides SIGNPLAY_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory containing <sign>.<ext> clips
    #[arg(short, long, env = "SIGNPLAY_VIDEO_ROOT")]
    video_root: Option<PathBuf>,

    /// Force a speed mode (normal, fast, ultra, instant)
    #[arg(short, long)]
    speed: Option<SpeedMode>,

    /// Skip failed signs instead of stopping the run
    #[arg(long)]
    continue_on_error: bool,

    /// Sign identifiers to play, in order
    #[arg(required = true)]
    signs: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, config_path) = TomlConfig::load_resolved(args.config.as_deref())
        .context("Failed to load configuration")?;

    init_tracing(&config, config_path.is_some())?;

    if let Some(path) = &config_path {
        info!("Configuration: {}", path.display());
    }

    let mut settings = RuntimeSettings::from_toml(&config);
    if let Some(root) = args.video_root {
        settings.video_root = root;
    }
    if args.continue_on_error {
        settings.queue.pause_on_error = false;
    }
    settings.queue.auto_start = false;

    info!("Video root: {}", settings.video_root.display());

    let events = EventBus::new(settings.event_capacity);
    let logger = tokio::spawn(log_events(events.subscribe()));

    let resolver = PathTemplateResolver::new(&settings.video_root, settings.file_extension.clone());
    let pool = Arc::new(
        ResourcePool::new(
            settings.pool.clone(),
            Arc::new(FsVideoLoader::new()),
            Arc::new(resolver),
        )
        .with_events(events.clone()),
    );

    let machine = Arc::new(AvatarStateMachine::with_events(
        settings.machine.clone(),
        settings.timing.clone(),
        Arc::clone(&pool),
        events.clone(),
    ));

    let queue = SignQueue::with_events(
        Arc::clone(&machine),
        Arc::new(LoggingHooks),
        settings.queue.clone(),
        events.clone(),
    );

    // Preload everything, first sign as priority
    let sources: BTreeMap<String, String> = args
        .signs
        .iter()
        .map(|sign| (sign.clone(), pool.source_uri(sign)))
        .collect();
    let priority: Vec<String> = args.signs.iter().take(1).cloned().collect();
    let preload = pool.preload_batch(&sources, &priority).await;
    if preload.failed > 0 {
        warn!(
            "{} of {} clips unavailable, placeholders will be shown",
            preload.failed, preload.total
        );
    }

    let mut options = SignOptions::default();
    if let Some(speed) = args.speed {
        options = options.with_speed(speed);
    }
    queue
        .add_signs(&args.signs, options)
        .context("Failed to queue signs")?;
    queue.start();

    tokio::select! {
        _ = queue.wait_until_idle() => {}
        _ = halted_on_error(events.subscribe()) => {
            warn!("Queue paused after a failed sign, stopping");
            queue.stop().await;
        }
        _ = shutdown_signal() => {
            queue.stop().await;
        }
    }

    let status = queue.get_status();
    println!(
        "{}",
        serde_json::to_string_pretty(&status).context("Failed to serialize queue status")?
    );

    pool.dispose();
    logger.abort();

    info!("Playback finished");
    Ok(())
}

fn init_tracing(config: &TomlConfig, from_file: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if from_file {
            config.logging.level.as_str().into()
        } else {
            DEFAULT_LOG_FILTER.into()
        }
    });

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };
    let stderr_layer = file_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}

/// Log every event until the bus closes
async fn log_events(mut rx: broadcast::Receiver<SignEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => debug!("event: {}", json),
                Err(e) => warn!("Unserializable {} event: {}", event.event_type(), e),
            },
            Err(RecvError::Lagged(skipped)) => warn!("Event log lagged, {} events skipped", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Resolve when the queue pauses itself after an exhausted item
async fn halted_on_error(mut rx: broadcast::Receiver<SignEvent>) {
    let mut failed = false;
    loop {
        match rx.recv().await {
            Ok(SignEvent::SignFailed { .. }) => failed = true,
            Ok(SignEvent::QueuePaused { .. }) if failed => return,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

/// Ctrl+C / SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping playback");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping playback");
        },
    }
}
