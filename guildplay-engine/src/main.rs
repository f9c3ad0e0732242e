//! guildplay - console playback front end
//!
//! Drives the playback engine from stdin commands. Audio for each guild is
//! written to `<out_dir>/<guild>.<ext>` by the file sink transport.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use guildplay_common::config::{ConfigSource, TomlConfig};
use guildplay_common::{EventBus, SessionEvent};
use guildplay_engine::catalog::{Catalog, ExtractorCatalog};
use guildplay_engine::console;
use guildplay_engine::providers::{build_chain, HttpLibrary};
use guildplay_engine::transport::FileSinkFactory;
use guildplay_engine::{PlaybackEngine, SessionRegistry, SessionSettings};
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_OUT_DIR: &str = "./guildplay-out";

/// Command-line arguments for guildplay
#[derive(Parser, Debug)]
#[command(name = "guildplay")]
#[command(about = "Per-guild audio playback engine with a console front end")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "GUILDPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Directory receiving the audio of each guild
    #[arg(short, long, env = "GUILDPLAY_OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// Extractor executable
    #[arg(long, env = "GUILDPLAY_EXTRACTOR")]
    extractor: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read first so its log level can seed the filter
    let (mut config, source) = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    let level = &config.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("guildplay_engine={},guildplay_common={}", level, level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &source {
        ConfigSource::File(path) => info!("Loaded config from {}", path.display()),
        ConfigSource::Missing(_) | ConfigSource::NoConfigDir => {
            warn!("No config file found, using {}", source)
        }
    }

    if let Some(out_dir) = args.out_dir {
        config.output_dir = Some(out_dir);
    }
    if let Some(extractor) = args.extractor {
        config.extractor.binary = extractor;
    }
    let out_dir = config
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR));

    info!("Starting guildplay");
    info!("Output directory: {}", out_dir.display());
    info!("Extractor: {}", config.extractor.binary.display());

    let events = EventBus::default();
    let catalog: Arc<dyn Catalog> = Arc::new(ExtractorCatalog::new(config.extractor.clone()));
    let library = Arc::new(HttpLibrary::new(config.extractor.clone()));
    let chain = Arc::new(build_chain(&config, catalog.clone(), library.clone(), library));
    info!("Provider chain: {}", chain.provider_names().join(" -> "));

    let registry = SessionRegistry::new(
        Arc::new(FileSinkFactory::new(out_dir)),
        chain,
        SessionSettings::from(&config),
        events.clone(),
    );
    let engine = PlaybackEngine::new(registry, catalog, events);
    tokio::spawn(log_events(engine.subscribe()));
    info!("Playback engine initialized, reading commands from stdin");

    let stdin = BufReader::new(tokio::io::stdin());
    let signalled = tokio::select! {
        result = console::run(&engine, stdin, tokio::io::stdout()) => {
            result.context("Console error")?;
            info!("Console closed, shutting down");
            false
        }
        _ = shutdown_signal() => true,
    };

    engine.shutdown().await;
    info!("Shutdown complete");

    if signalled {
        // The blocking stdin read would otherwise hold the runtime open
        std::process::exit(0);
    }
    Ok(())
}

async fn log_events(mut rx: broadcast::Receiver<SessionEvent>) {
    loop {
        match rx.recv().await {
            Ok(SessionEvent::TrackSkipped { guild_id, title, reason, .. }) => {
                warn!(guild = %guild_id, "Could not play {:?}: {}", title, reason);
            }
            Ok(event) => debug!(guild = %event.guild_id(), "Session event: {}", event.event_type()),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Event log lagged, {} events missed", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
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
