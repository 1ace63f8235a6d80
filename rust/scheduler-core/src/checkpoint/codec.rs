// rust/scheduler-core/src/checkpoint/codec.rs

//! Portable snapshot of a dataset's scheduling progress.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::shard::{Shard, SplitterCursor, StorageKind, TaskId};

/// Current checkpoint schema version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Dataset-scoped scheduling snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetCheckpoint {
    pub version: u32,
    pub dataset_name: String,
    /// Records per epoch pass the snapshot was taken with.
    pub dataset_size: u64,
    /// Shard size the snapshot was taken with.
    pub shard_size: u64,
    pub num_epochs: u32,
    pub shuffle: bool,
    pub storage_kind: StorageKind,
    pub splitter: SplitterCursor,
    /// Pending shards in queue order.
    pub todo: Vec<Shard>,
    /// Shards that were leased out when the snapshot was taken.
    pub doing: Vec<Shard>,
    pub completed_task_ids: Vec<TaskId>,
    pub next_task_id: TaskId,
    #[serde(default)]
    pub completed_step: u64,
    #[serde(default)]
    pub epoch: u32,
}

impl DatasetCheckpoint {
    /// Encodes the checkpoint as JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SchedulerError::serialization(format!("failed to encode checkpoint: {e}")))
    }

    /// Decodes a JSON checkpoint, rejecting unknown schema versions.
    pub fn from_json(json: &str) -> Result<Self> {
        let checkpoint: Self = serde_json::from_str(json)
            .map_err(|e| SchedulerError::serialization(format!("failed to decode checkpoint: {e}")))?;
        checkpoint.check_version()?;
        Ok(checkpoint)
    }

    /// Decodes a checkpoint from UTF-8 JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let checkpoint: Self = serde_json::from_slice(bytes)
            .map_err(|e| SchedulerError::serialization(format!("failed to decode checkpoint: {e}")))?;
        checkpoint.check_version()?;
        Ok(checkpoint)
    }

    /// Number of shards still to be processed.
    pub fn remaining_shards(&self) -> usize {
        self.todo.len() + self.doing.len()
    }

    fn check_version(&self) -> Result<()> {
        if self.version != CHECKPOINT_VERSION {
            return Err(SchedulerError::serialization(format!(
                "unsupported checkpoint version {} for dataset '{}' (expected {})",
                self.version, self.dataset_name, CHECKPOINT_VERSION
            )));
        }
        Ok(())
    }
}
