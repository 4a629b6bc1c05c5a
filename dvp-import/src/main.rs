//! dvp-import - Main entry point
//!
//! One-shot importer: resolves configuration, opens the database, imports
//! every pending snapshot file and exits. Ctrl+C or SIGTERM stops the run
//! between batches; the next invocation resumes from the saved checkpoints.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dvp_common::config::{
    resolve_config_path, CompiledDefaults, ConfigOverrides, ImportConfig, TomlConfig,
};
use dvp_common::db::init_database;
use dvp_import::db::{SqliteCheckpointStore, SqliteRecordStore};
use dvp_import::{ImportOrchestrator, ImportSettings, RunOutcome};

/// Command-line arguments for dvp-import
#[derive(Parser, Debug)]
#[command(name = "dvp-import")]
#[command(about = "Resumable importer for delegate voting power snapshots")]
#[command(version)]
struct Args {
    /// Directory containing YYYY-MM-DD.csv snapshot files
    #[arg(short, long, env = "DVP_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, env = "DVP_DATABASE")]
    database: Option<PathBuf>,

    /// Config file (defaults to DVP_CONFIG, then the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Records per upsert batch
    #[arg(short, long, env = "DVP_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Raw row cadence for checkpoint updates
    #[arg(long, env = "DVP_CHECKPOINT_INTERVAL")]
    checkpoint_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Loaded before tracing so its log_level can seed the filter
    let config_path = resolve_config_path(args.config.as_deref());
    let (toml_config, toml_error) = match config_path.as_deref() {
        Some(path) => match TomlConfig::load(path) {
            Ok(config) => (config, None),
            Err(e) => (TomlConfig::default(), Some(e)),
        },
        None => (TomlConfig::default(), None),
    };

    let defaults = CompiledDefaults::for_current_platform();
    let default_filter = toml_config
        .log_level
        .clone()
        .unwrap_or_else(|| defaults.log_level.clone());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting dvp-import (git: {}, built: {}, profile: {})",
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    if let (Some(path), Some(e)) = (config_path.as_deref(), toml_error) {
        warn!(
            "Failed to load config file {}: {}. Using defaults.",
            path.display(),
            e
        );
    }

    let overrides = ConfigOverrides {
        data_dir: args.data_dir,
        database_path: args.database,
        batch_size: args.batch_size,
        checkpoint_interval: args.checkpoint_interval,
    };
    let config = ImportConfig::resolve(&overrides, &toml_config, &defaults)
        .context("Invalid configuration")?;

    info!("Snapshot directory: {}", config.data_dir.display());
    info!("Database: {}", config.database_path.display());

    let settings = ImportSettings::new(config.batch_size, config.checkpoint_interval)
        .context("Invalid import settings")?;

    let pool = init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    let orchestrator = ImportOrchestrator::new(
        Arc::new(SqliteRecordStore::new(pool.clone(), config.max_lock_wait_ms)),
        Arc::new(SqliteCheckpointStore::new(pool.clone(), config.max_lock_wait_ms)),
        settings,
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let result = orchestrator.run(&config.data_dir, &cancel).await;
    pool.close().await;
    let summary = result.context("Import run failed")?;

    match summary.outcome {
        RunOutcome::Finished => {
            info!(
                "Import finished: {} files completed this run, {} total",
                summary.files_completed.len(),
                summary.files_total
            );
            Ok(())
        }
        RunOutcome::Cancelled => {
            info!("Import interrupted by user. Progress has been saved in checkpoints.");
            Ok(())
        }
        RunOutcome::Halted { file_name, reason } => {
            anyhow::bail!("Import halted at {}: {}", file_name, reason)
        }
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
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
            info!("Received Ctrl+C, finishing current batch");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing current batch");
        },
    }

    token.cancel();
}
