//! Shard Scheduler Coordinator
//!
//! This binary hosts the shard task manager: it declares the configured
//! datasets, restores their newest checkpoints, watches for stalled
//! evaluation leases and periodically persists scheduling state.
//!
//! # Usage
//!
//! ```bash
//! # Start with configuration file
//! shard-coordinator --config coordinator.toml
//!
//! # Override the checkpoint interval and log level
//! shard-coordinator --config coordinator.toml --checkpoint-interval 30 --log-level debug
//! ```

mod service;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scheduler_core::checkpoint::CheckpointStore;
use scheduler_core::{LocalStorage, SchedulerConfig, TaskManager, WorkerId};
use service::CoordinatorService;

/// Shard Scheduler Coordinator
#[derive(Parser, Debug)]
#[command(name = "shard-coordinator")]
#[command(about = "Coordinator that leases dataset shards to training workers")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between checkpoints (overrides checkpoint.interval_secs, 0 disables)
    #[arg(long)]
    checkpoint_interval: Option<u64>,

    /// Start fresh instead of restoring the newest checkpoints
    #[arg(long)]
    no_restore: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_env("SHARD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let mut config = match &args.config {
        Some(path) => SchedulerConfig::from_file(path)?,
        None => SchedulerConfig::default(),
    }
    .with_env_overrides();
    if let Some(interval) = args.checkpoint_interval {
        config.checkpoint.interval_secs = interval;
    }
    config.validate()?;

    tracing::info!("Starting shard coordinator");
    tracing::info!(
        "  Checkpoint dir: {} ({}, every {}s)",
        config.checkpoint.checkpoint_dir.display(),
        config.checkpoint.compression,
        config.checkpoint.interval_secs
    );
    tracing::info!(
        "  Task timeout: {}s, checked every {}s",
        config.task.task_timeout_secs,
        config.task.timeout_check_interval_secs
    );

    let storage = Arc::new(LocalStorage::new(&config.storage)?);
    tracing::info!("  Storage path: {}", storage.base_path().display());
    let store = Arc::new(CheckpointStore::new(storage, config.checkpoint.clone()));
    let manager = Arc::new(TaskManager::new(config.task.clone()));

    for dataset in &config.datasets {
        manager.new_dataset(dataset).await?;
    }

    let service = CoordinatorService::new(manager.clone(), Some(store));
    if !args.no_restore {
        let restored = service.restore_latest_checkpoints().await;
        tracing::info!(restored, "restored datasets from checkpoints");
    }

    // Timed-out workers have their leases released so other workers can
    // pick the shards up.
    let (timeout_tx, mut timeout_rx) = mpsc::unbounded_channel::<WorkerId>();
    manager
        .set_task_timeout_callback(Arc::new(move |worker_id: WorkerId| {
            tracing::warn!(worker_id, "worker timed out, releasing its tasks");
            let _ = timeout_tx.send(worker_id);
        }))
        .await;

    let recover_manager = manager.clone();
    let recover_handle = tokio::spawn(async move {
        while let Some(worker_id) = timeout_rx.recv().await {
            recover_manager.recover_tasks(worker_id).await;
            recover_manager.remove_running_worker(worker_id);
        }
    });

    let timeout_handle = manager.start();

    let checkpoint_handle = (config.checkpoint.interval_secs > 0).then(|| {
        let service = service.clone();
        let period = Duration::from_secs(config.checkpoint.interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = service.persist_checkpoints().await {
                    tracing::error!(error = %e, "failed to persist checkpoints");
                }
                if service.manager().finished().await {
                    tracing::info!("all datasets completed");
                }
            }
        })
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down coordinator...");

    for handle in [Some(recover_handle), timeout_handle, checkpoint_handle]
        .into_iter()
        .flatten()
    {
        handle.abort();
    }

    let written = service.persist_checkpoints().await?;
    tracing::info!(written, "final checkpoints written");

    Ok(())
}
