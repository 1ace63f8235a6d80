// rust/scheduler-core/src/checkpoint/store.rs

//! Durable home for dataset checkpoints.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::CheckpointConfig;
use crate::error::Result;
use crate::storage::StorageBackend;

use super::codec::DatasetCheckpoint;
use super::reader::CheckpointReader;
use super::writer::CheckpointWriter;

/// Saves and loads dataset checkpoints through a storage backend.
pub struct CheckpointStore {
    writer: CheckpointWriter,
    reader: CheckpointReader,
}

impl CheckpointStore {
    pub fn new(storage: Arc<dyn StorageBackend>, config: CheckpointConfig) -> Self {
        let reader = CheckpointReader::new(storage.clone(), config.checkpoint_dir.clone());
        Self {
            writer: CheckpointWriter::new(storage, config),
            reader,
        }
    }

    pub fn save(&self, checkpoint: &DatasetCheckpoint) -> Result<PathBuf> {
        self.writer.write(checkpoint)
    }

    pub fn load_latest(&self, dataset: &str) -> Result<Option<DatasetCheckpoint>> {
        self.reader.load_latest(dataset)
    }
}
