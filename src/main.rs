//! # Yapsbot
//!
//! Telegram bot that tracks Kaito Yaps scores for Twitter handles and
//! notifies chats when a tracked handle gains points.
//!
//! Usage:
//!   yapsbot                              # Run the bot (config from ~/.yapsbot/config.toml)
//!   yapsbot --config ./yapsbot.toml      # Custom config file
//!   yapsbot --interval-minutes 15        # Check scores every 15 minutes
//!   yapsbot --once                       # Run one tracking cycle and exit

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use yapsbot_channels::{CommandHandler, TelegramChannel, format};
use yapsbot_core::YapsConfig;
use yapsbot_core::traits::{Notifier, ScoreSource, TrackedHandleStore};
use yapsbot_providers::KaitoClient;
use yapsbot_scheduler::engine::MessageFormatter;
use yapsbot_scheduler::{SqliteStore, TrackingScheduler, TrackingSettings};

#[derive(Parser)]
#[command(
    name = "yapsbot",
    version,
    about = "📈 Yapsbot: Kaito Yaps tracker for Telegram"
)]
struct Cli {
    /// Config file (default: ~/.yapsbot/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Minutes between tracking cycles
    #[arg(long)]
    interval_minutes: Option<u64>,

    /// SQLite database path
    #[arg(long)]
    db_path: Option<String>,

    /// Run a single tracking cycle and exit
    #[arg(long)]
    once: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<YapsConfig> {
    let mut config = match &cli.config {
        Some(path) => YapsConfig::load_from(path)?,
        None => YapsConfig::load()?,
    };
    config.apply_env()?;

    if let Some(minutes) = cli.interval_minutes {
        config.tracking.interval_minutes = minutes;
    }
    if let Some(path) = &cli.db_path {
        config.database.path = path.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "yapsbot=debug" } else { "yapsbot=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(&cli).context("invalid configuration")?;

    let store: Arc<dyn TrackedHandleStore> = Arc::new(
        SqliteStore::open(&config.database.resolved_path()).context("failed to open database")?,
    );
    let source: Arc<dyn ScoreSource> = Arc::new(KaitoClient::from_config(&config.kaito));
    let telegram = Arc::new(TelegramChannel::new(config.telegram.clone()));
    telegram
        .connect()
        .await
        .context("failed to connect to Telegram")?;
    let notifier: Arc<dyn Notifier> = telegram.clone();

    let formatter: MessageFormatter = Arc::new(format::tracked_change_message);
    let scheduler = TrackingScheduler::new(
        source.clone(),
        store.clone(),
        notifier.clone(),
        formatter,
        TrackingSettings::from(&config.tracking),
    );

    if cli.once {
        match scheduler.run_now().await {
            Some(report) => tracing::info!("📊 {report:?}"),
            None => tracing::warn!("Tracking cycle did not run"),
        }
        return Ok(());
    }

    scheduler.start();
    let handler = CommandHandler::new(source, store, notifier);
    let mut incoming = telegram.start_polling();
    tracing::info!("🚀 Yapsbot is running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            msg = incoming.next() => {
                let Some(msg) = msg else {
                    tracing::warn!("Telegram stream ended");
                    break;
                };
                let handler = handler.clone();
                tokio::spawn(async move { handler.handle(msg).await });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("👋 Shutting down...");
                break;
            }
        }
    }

    scheduler.stop();
    Ok(())
}
