// rust/scheduler-core/src/shard/mod.rs

//! Shard splitting, leasing and recovery.
//!
//! A [`TaskManager`] owns one [`DatasetManager`] per dataset. Each dataset
//! manager draws shards from a [`DatasetSplitter`], leases them to workers as
//! [`Task`]s and requeues the ones whose workers fail.

mod dataset_manager;
mod splitter;
mod task;
mod task_manager;

pub use dataset_manager::DatasetManager;
pub use splitter::{
    create_dataset_splitter, DatasetSplitter, SplitterCursor, SplitterParams, StorageKind,
    TableDatasetSplitter, TextDatasetSplitter, DEFAULT_MAX_SHARD_COUNT,
};
pub use task::{DoingTask, Shard, Task, TaskId, TaskKind, WorkerId};
pub use task_manager::{TaskManager, TaskTimeoutCallback};
