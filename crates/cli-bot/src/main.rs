use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use bot::admin::AdminOps;
use bot::artifacts;
use bot::audit::AuditSink;
use bot::config::BotConfig;
use bot::crypto::SecretCipher;
use bot::engine::{MediaMerger, MergeEngine};
use bot::handlers::Intake;
use bot::orchestrator::Orchestrator;
use bot::state::SharedState;
use bot::storage::Storage;
use bot::transfer::TransferPipeline;
use bot::transport::{CredentialValidator, Messenger, RemoteFiles};

mod botapi;
mod dispatch;

/// Video/audio merge bot daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Use RUST_LOG env var, or default to info (debug with --verbose)
    let mut logger = env_logger::Builder::from_default_env();
    logger.format_timestamp_secs();
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let cfg = Arc::new(
        BotConfig::load(args.config.as_deref()).context("Failed to load configuration")?,
    );

    info!("muxbotd starting");
    info!("  Temp dir: {}", cfg.temp_dir.display());
    info!("  ffmpeg: {}", cfg.ffmpeg_bin.display());
    info!("  Database: {}", cfg.database_url);
    info!("  Admins: {:?}", cfg.admin_ids);
    info!("  Merge timeout: {}s, transfer timeout: {}s", cfg.merge_timeout_secs, cfg.transfer_timeout_secs);

    std::fs::create_dir_all(&cfg.temp_dir)
        .with_context(|| format!("Failed to create temp dir: {}", cfg.temp_dir.display()))?;

    // Recovery on startup: reclaim artifacts left by failed or interrupted tasks
    let swept = artifacts::sweep_orphaned_artifacts(&cfg.temp_dir)
        .context("Failed to sweep temp dir")?;
    if swept > 0 {
        info!("✅ Startup sweep removed {swept} orphaned artifact(s)");
    } else {
        info!("✅ Startup sweep found no orphaned artifacts");
    }

    let engine = Arc::new(MergeEngine::new(
        cfg.ffmpeg_bin.clone(),
        cfg.merge_timeout_secs,
    ));
    engine.probe().await.context("ffmpeg is not usable")?;

    let storage = Arc::new(Storage::connect(&cfg.database_url).await?);
    let cipher = SecretCipher::from_base64(&cfg.encryption_key)
        .context("Invalid encryption key")?;

    let api = Arc::new(botapi::BotApi::new(&cfg.bot_token)?);
    let transport = Arc::new(botapi::Transport { api: api.clone() });
    let messenger: Arc<dyn Messenger> = transport.clone();
    let files: Arc<dyn RemoteFiles> = transport;
    let validator: Arc<dyn CredentialValidator> =
        Arc::new(botapi::BotApiCredentialValidator::new()?);

    let state = SharedState::new();
    let merger: Arc<dyn MediaMerger> = engine;
    let orchestrator = Arc::new(Orchestrator::new(
        cfg.clone(),
        state.clone(),
        storage.clone(),
        merger,
        TransferPipeline::new(files, cfg.transfer_timeout_secs),
        messenger.clone(),
        AuditSink::new(messenger.clone(), cfg.log_channel_id),
    ));
    let intake = Arc::new(Intake::new(
        cfg.clone(),
        state.clone(),
        storage.clone(),
        messenger.clone(),
        orchestrator,
    ));
    let admin = Arc::new(AdminOps::new(
        cfg.clone(),
        state,
        storage,
        messenger.clone(),
        validator,
        cipher,
    ));

    let dispatcher = Arc::new(dispatch::Dispatcher {
        api,
        intake,
        admin,
        messenger,
    });
    dispatcher.run().await
}
