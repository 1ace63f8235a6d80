// rust/scheduler-core/src/shard/task.rs

//! Task values handed out to workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of one lease of a shard. Unique within a dataset.
pub type TaskId = u64;

/// Identifier of a worker process.
pub type WorkerId = u64;

/// What a worker is expected to do with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    #[default]
    None,
    Normal,
    Evaluation,
}

/// A contiguous slice of dataset indices within one epoch pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shard {
    /// Name of the dataset the shard belongs to.
    pub name: String,
    /// First index (inclusive).
    pub start: u64,
    /// Last index (exclusive).
    pub end: u64,
    /// Zero-based epoch pass this shard was emitted for.
    pub epoch: u32,
    /// Shuffled record indices for text datasets; `None` means `start..end`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_indices: Option<Vec<u64>>,
}

impl Shard {
    pub fn new(name: impl Into<String>, start: u64, end: u64, epoch: u32) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            epoch,
            record_indices: None,
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Dataset indices covered by this shard, in the order a worker should read them.
    pub fn indices(&self) -> Vec<u64> {
        match &self.record_indices {
            Some(indices) => indices.clone(),
            None => (self.start..self.end).collect(),
        }
    }
}

/// One lease-able instance of a shard.
///
/// Tasks are immutable; a retried shard gets a new `Task` with a fresh id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    task_id: TaskId,
    kind: TaskKind,
    shard: Shard,
    #[serde(default)]
    retry_count: u32,
}

impl Task {
    pub fn new(task_id: TaskId, kind: TaskKind, shard: Shard) -> Self {
        Self {
            task_id,
            kind,
            shard,
            retry_count: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task_id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    /// How many times the shard behind this task has failed before.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Re-mints the task for another attempt at the same shard.
    pub(crate) fn retry(self, task_id: TaskId) -> Self {
        Self {
            task_id,
            kind: self.kind,
            shard: self.shard,
            retry_count: self.retry_count.saturating_add(1),
        }
    }
}

/// A task currently leased to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoingTask {
    pub task: Task,
    pub worker_id: WorkerId,
    pub start_time: DateTime<Utc>,
}

impl DoingTask {
    pub fn new(task: Task, worker_id: WorkerId, start_time: DateTime<Utc>) -> Self {
        Self {
            task,
            worker_id,
            start_time,
        }
    }
}
