// rust/scheduler-core/src/lib.rs

//! Shard Scheduler - Core Library
//!
//! This crate splits datasets into shards, leases them to training workers,
//! detects stalled evaluation leases and snapshots the scheduling state so a
//! restarted coordinator resumes without handing out consumed shards again.

pub mod clock;
pub mod config;
pub mod error;
pub mod monitor;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{DatasetParams, SchedulerConfig, TaskConfig};
pub use error::{Result, SchedulerError};
pub use storage::{LocalStorage, StorageBackend, StorageReader, StorageWriter};

pub mod checkpoint;
pub use checkpoint::{CheckpointStore, DatasetCheckpoint};

pub mod shard;
pub use shard::{
    DatasetManager, DoingTask, Shard, StorageKind, Task, TaskId, TaskKind, TaskManager,
    TaskTimeoutCallback, WorkerId,
};
