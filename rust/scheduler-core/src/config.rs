// rust/scheduler-core/src/config.rs

//! Configuration management for the shard scheduler.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, SchedulerError};
use crate::shard::{StorageKind, TaskKind, DEFAULT_MAX_SHARD_COUNT};

/// Minibatches per shard used when a dataset does not specify its own.
pub const DEFAULT_MINIBATCHES_PER_SHARD: u64 = 100;

// Top-level scheduler configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub storage: StorageConfig,
    pub checkpoint: CheckpointConfig,
    pub task: TaskConfig,
    /// Datasets declared when the coordinator starts.
    pub datasets: Vec<DatasetParams>,
}

// Storage configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // Base path for all storage operations.
    pub base_path: PathBuf,
    // Buffer size in bytes for I/O operations.
    pub buffer_size: usize,
}

// Checkpoint persistence options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    // Directory for checkpoint files, relative to the storage base path.
    pub checkpoint_dir: PathBuf,
    // Compression algorithm: "none", "lz4", or "zstd".
    pub compression: String,
    // Compression level (zstd only).
    pub compression_level: i32,
    // Number of checkpoints to keep per dataset.
    pub keep_last_n: usize,
    // Whether to write to a temp file and rename.
    pub atomic_writes: bool,
    /// Seconds between periodic checkpoints; 0 disables them.
    pub interval_secs: u64,
}

/// Task leasing and timeout detection options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Run the background timeout detector.
    pub relaunch_timeout_worker: bool,
    /// Seconds between timeout scans.
    pub timeout_check_interval_secs: u64,
    /// Seconds an evaluation lease may stay open before its worker is
    /// reported as unresponsive.
    pub task_timeout_secs: u64,
    pub default_minibatches_per_shard: u64,
    /// Maximum shards a splitter materialises at once.
    pub max_shard_count: u64,
}

/// Parameters of one dataset, as passed to `TaskManager::new_dataset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetParams {
    pub dataset_name: String,
    pub batch_size: u64,
    #[serde(default = "default_num_epochs")]
    pub num_epochs: u32,
    /// Number of records. Negative sizes are rejected at creation time.
    pub dataset_size: i64,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub num_minibatches_per_shard: Option<u64>,
    #[serde(default)]
    pub task_kind: TaskKind,
    #[serde(default)]
    pub storage_kind: StorageKind,
    /// Shuffle seed; drawn from the OS when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_num_epochs() -> u32 {
    1
}

impl DatasetParams {
    /// Creates parameters for an unshuffled, single-epoch table dataset.
    pub fn new(dataset_name: impl Into<String>, batch_size: u64, dataset_size: i64) -> Self {
        Self {
            dataset_name: dataset_name.into(),
            batch_size,
            num_epochs: 1,
            dataset_size,
            shuffle: false,
            num_minibatches_per_shard: None,
            task_kind: TaskKind::Normal,
            storage_kind: StorageKind::Table,
            seed: None,
        }
    }

    #[must_use]
    pub fn with_epochs(mut self, num_epochs: u32) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    #[must_use]
    pub fn with_shuffle(mut self, shuffle: bool, seed: Option<u64>) -> Self {
        self.shuffle = shuffle;
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_minibatches_per_shard(mut self, minibatches: u64) -> Self {
        self.num_minibatches_per_shard = Some(minibatches);
        self
    }

    #[must_use]
    pub fn with_task_kind(mut self, kind: TaskKind) -> Self {
        self.task_kind = kind;
        self
    }

    #[must_use]
    pub fn with_storage_kind(mut self, kind: StorageKind) -> Self {
        self.storage_kind = kind;
        self
    }

    /// Records per shard: `batch_size * minibatches`, falling back to
    /// `default_minibatches` when unset.
    pub fn shard_size(&self, default_minibatches: u64) -> u64 {
        self.batch_size
            .saturating_mul(self.num_minibatches_per_shard.unwrap_or(default_minibatches))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./data"),
            buffer_size: 64 * 1024, // 64 KB
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("./checkpoints"),
            compression: "lz4".to_string(),
            compression_level: 1,
            keep_last_n: 3,
            atomic_writes: true,
            interval_secs: 60,
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            relaunch_timeout_worker: true,
            timeout_check_interval_secs: 30,
            task_timeout_secs: 1800,
            default_minibatches_per_shard: DEFAULT_MINIBATCHES_PER_SHARD,
            max_shard_count: DEFAULT_MAX_SHARD_COUNT,
        }
    }
}

impl FromStr for SchedulerConfig {
    type Err = SchedulerError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| SchedulerError::config_with_source("failed to parse TOML config", e))
    }
}

impl SchedulerConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SchedulerError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `SHARD_` and use underscores
    // to separate nested fields. For example:
    // - `SHARD_STORAGE_BASE_PATH` overrides `storage.base_path`
    // - `SHARD_CHECKPOINT_COMPRESSION` overrides `checkpoint.compression`
    // - `SHARD_TASK_TIMEOUT_SECS` overrides `task.task_timeout_secs`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Storage overrides
        if let Ok(val) = std::env::var("SHARD_STORAGE_BASE_PATH") {
            self.storage.base_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SHARD_STORAGE_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.storage.buffer_size = v;
            }
        }

        // Checkpoint overrides
        if let Ok(val) = std::env::var("SHARD_CHECKPOINT_DIR") {
            self.checkpoint.checkpoint_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SHARD_CHECKPOINT_COMPRESSION") {
            self.checkpoint.compression = val;
        }
        if let Ok(val) = std::env::var("SHARD_CHECKPOINT_COMPRESSION_LEVEL") {
            if let Ok(v) = val.parse() {
                self.checkpoint.compression_level = v;
            }
        }
        if let Ok(val) = std::env::var("SHARD_CHECKPOINT_KEEP_LAST_N") {
            if let Ok(v) = val.parse() {
                self.checkpoint.keep_last_n = v;
            }
        }
        if let Ok(val) = std::env::var("SHARD_CHECKPOINT_ATOMIC_WRITES") {
            if let Ok(v) = val.parse() {
                self.checkpoint.atomic_writes = v;
            }
        }
        if let Ok(val) = std::env::var("SHARD_CHECKPOINT_INTERVAL_SECS") {
            if let Ok(v) = val.parse() {
                self.checkpoint.interval_secs = v;
            }
        }

        // Task overrides
        if let Ok(val) = std::env::var("SHARD_TASK_RELAUNCH_TIMEOUT_WORKER") {
            if let Ok(v) = val.parse() {
                self.task.relaunch_timeout_worker = v;
            }
        }
        if let Ok(val) = std::env::var("SHARD_TASK_TIMEOUT_CHECK_INTERVAL_SECS") {
            if let Ok(v) = val.parse() {
                self.task.timeout_check_interval_secs = v;
            }
        }
        if let Ok(val) = std::env::var("SHARD_TASK_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.task.task_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("SHARD_TASK_DEFAULT_MINIBATCHES_PER_SHARD") {
            if let Ok(v) = val.parse() {
                self.task.default_minibatches_per_shard = v;
            }
        }
        if let Ok(val) = std::env::var("SHARD_TASK_MAX_SHARD_COUNT") {
            if let Ok(v) = val.parse() {
                self.task.max_shard_count = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.storage.buffer_size == 0 {
            return Err(SchedulerError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }

        let valid_compression = ["none", "lz4", "zstd"];
        if !valid_compression.contains(&self.checkpoint.compression.as_str()) {
            return Err(SchedulerError::config(format!(
                "checkpoint.compression must be one of: {}",
                valid_compression.join(", ")
            )));
        }

        if self.checkpoint.keep_last_n == 0 {
            return Err(SchedulerError::config(
                "checkpoint.keep_last_n must be greater than 0",
            ));
        }

        if self.task.timeout_check_interval_secs == 0 {
            return Err(SchedulerError::config(
                "task.timeout_check_interval_secs must be greater than 0",
            ));
        }

        if self.task.default_minibatches_per_shard == 0 {
            return Err(SchedulerError::config(
                "task.default_minibatches_per_shard must be greater than 0",
            ));
        }

        if self.task.max_shard_count == 0 {
            return Err(SchedulerError::config(
                "task.max_shard_count must be greater than 0",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for dataset in &self.datasets {
            if dataset.dataset_name.is_empty() {
                return Err(SchedulerError::config("datasets[].dataset_name must not be empty"));
            }
            if !seen.insert(dataset.dataset_name.as_str()) {
                return Err(SchedulerError::config(format!(
                    "dataset '{}' is declared more than once",
                    dataset.dataset_name
                )));
            }
            if dataset.batch_size == 0 {
                return Err(SchedulerError::config(format!(
                    "dataset '{}': batch_size must be greater than 0",
                    dataset.dataset_name
                )));
            }
        }

        Ok(())
    }
}
