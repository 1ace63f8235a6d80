// rust/scheduler-core/src/checkpoint/writer.rs

//! Checkpoint writer implementation.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::CheckpointConfig;
use crate::error::{Result, SchedulerError};
use crate::storage::StorageBackend;

use super::codec::DatasetCheckpoint;
use super::format::{
    checksum, file_prefix, parse_timestamp, CheckpointHeader, CHECKPOINT_SUFFIX, META_DATASET,
    META_EPOCH,
};

/// Persists dataset checkpoints with compression and integrity verification.
///
/// The `CheckpointWriter` handles:
/// - Compressing the JSON payload (none, lz4, zstd)
/// - Computing checksums for integrity verification
/// - Atomic writes (write to temp file then rename)
/// - Cleanup of old checkpoints per dataset
pub struct CheckpointWriter {
    storage: Arc<dyn StorageBackend>,
    config: CheckpointConfig,
}

impl CheckpointWriter {
    pub fn new(storage: Arc<dyn StorageBackend>, config: CheckpointConfig) -> Self {
        Self { storage, config }
    }

    /// Writes a checkpoint and returns the path to the saved file.
    ///
    /// Older checkpoints of the same dataset beyond `keep_last_n` are removed.
    pub fn write(&self, checkpoint: &DatasetCheckpoint) -> Result<PathBuf> {
        self.storage.create_dir_all(&self.config.checkpoint_dir)?;

        let payload = checkpoint.to_json()?.into_bytes();
        let (compressed, compression) = self.compress(&payload)?;

        let mut metadata = HashMap::new();
        metadata.insert(META_DATASET.to_string(), checkpoint.dataset_name.clone());
        metadata.insert(META_EPOCH.to_string(), checkpoint.epoch.to_string());
        let header =
            CheckpointHeader::new(compression, payload.len() as u64, checksum(&payload), metadata);

        let header_bytes = bincode::serialize(&header)
            .map_err(|e| SchedulerError::checkpoint(format!("failed to serialize header: {e}")))?;

        let header_len = header_bytes.len() as u32;
        let mut file_data = Vec::with_capacity(4 + header_bytes.len() + compressed.len());
        file_data.extend_from_slice(&header_len.to_le_bytes());
        file_data.extend_from_slice(&header_bytes);
        file_data.extend_from_slice(&compressed);

        let filename = self.generate_filename(&checkpoint.dataset_name)?;
        let final_path = self.config.checkpoint_dir.join(&filename);

        if self.config.atomic_writes {
            let temp_path = self.config.checkpoint_dir.join(format!(".{filename}.tmp"));
            self.write_to_path(&temp_path, &file_data)?;
            self.storage.rename(&temp_path, &final_path)?;
        } else {
            self.write_to_path(&final_path, &file_data)?;
        }

        tracing::debug!(
            dataset = %checkpoint.dataset_name,
            path = %final_path.display(),
            bytes = file_data.len(),
            "wrote dataset checkpoint"
        );

        self.cleanup_old_checkpoints(&checkpoint.dataset_name)?;

        Ok(final_path)
    }

    /// Returns the compressed payload and the algorithm name.
    fn compress(&self, data: &[u8]) -> Result<(Vec<u8>, String)> {
        let compression = self.config.compression.as_str();

        let compressed = match compression {
            "none" => data.to_vec(),
            "lz4" => lz4_flex::compress_prepend_size(data),
            "zstd" => zstd::encode_all(data, self.config.compression_level).map_err(|e| {
                SchedulerError::checkpoint_with_source("zstd compression failed", e)
            })?,
            _ => {
                return Err(SchedulerError::checkpoint(format!(
                    "unknown compression algorithm: {compression}"
                )));
            }
        };

        Ok((compressed, compression.to_string()))
    }

    /// Timestamped filename, bumped past any file already written in the
    /// same millisecond.
    fn generate_filename(&self, dataset: &str) -> Result<String> {
        let prefix = file_prefix(dataset);
        let mut timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        let newest = self
            .storage
            .list(&self.config.checkpoint_dir)?
            .iter()
            .filter_map(|name| parse_timestamp(name, &prefix))
            .max();
        if let Some(newest) = newest {
            timestamp = timestamp.max(newest + 1);
        }

        Ok(format!("{prefix}{timestamp}{CHECKPOINT_SUFFIX}"))
    }

    fn write_to_path(&self, path: &Path, data: &[u8]) -> Result<()> {
        let mut writer = self.storage.open_write(path)?;
        writer.write_all(data).map_err(|e| {
            SchedulerError::storage_with_source(path, "failed to write checkpoint data", e)
        })?;
        writer.finish()
    }

    fn cleanup_old_checkpoints(&self, dataset: &str) -> Result<()> {
        let prefix = file_prefix(dataset);
        let mut matching: Vec<(u128, String)> = self
            .storage
            .list(&self.config.checkpoint_dir)?
            .into_iter()
            .filter_map(|name| parse_timestamp(&name, &prefix).map(|ts| (ts, name)))
            .collect();

        matching.sort();

        if matching.len() > self.config.keep_last_n {
            let to_delete = matching.len() - self.config.keep_last_n;
            for (_, filename) in matching.iter().take(to_delete) {
                self.storage.delete(&self.config.checkpoint_dir.join(filename))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CHECKPOINT_VERSION;
    use crate::config::StorageConfig;
    use crate::shard::{Shard, SplitterCursor, StorageKind};
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    fn sample(name: &str) -> DatasetCheckpoint {
        DatasetCheckpoint {
            version: CHECKPOINT_VERSION,
            dataset_name: name.to_string(),
            dataset_size: 10,
            shard_size: 2,
            num_epochs: 2,
            shuffle: false,
            storage_kind: StorageKind::Table,
            splitter: SplitterCursor {
                epoch: 0,
                next_ordinal: 1,
                seed: 3,
            },
            todo: vec![Shard::new(name, 2, 4, 0)],
            doing: vec![],
            completed_task_ids: vec![0],
            next_task_id: 2,
            completed_step: 2,
            epoch: 1,
        }
    }

    fn create_test_writer(
        compression: &str,
        keep_last_n: usize,
        atomic_writes: bool,
    ) -> (CheckpointWriter, Arc<LocalStorage>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(
            LocalStorage::new(&StorageConfig {
                base_path: temp_dir.path().to_path_buf(),
                ..Default::default()
            })
            .unwrap(),
        );
        let config = CheckpointConfig {
            checkpoint_dir: PathBuf::from("checkpoints"),
            compression: compression.to_string(),
            compression_level: 3,
            keep_last_n,
            atomic_writes,
            ..Default::default()
        };
        (CheckpointWriter::new(storage.clone(), config), storage, temp_dir)
    }

    #[test]
    fn test_write_creates_file_without_temp() {
        let (writer, storage, _temp) = create_test_writer("none", 3, true);

        let path = writer.write(&sample("train")).unwrap();

        assert!(storage.exists(&path).unwrap());
        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with(&file_prefix("train")));
        assert!(file_name.ends_with(".ckpt"));
        let temp_path = path.with_file_name(format!(".{file_name}.tmp"));
        assert!(!storage.exists(&temp_path).unwrap());
    }

    #[test]
    fn test_compression_algorithms() {
        for algo in ["lz4", "zstd"] {
            let (writer, _storage, _temp) = create_test_writer(algo, 3, true);
            let data = b"{\"dataset_name\":\"train\",\"todo\":[]}".repeat(8);

            let (compressed, name) = writer.compress(&data).unwrap();
            assert_eq!(name, algo);
            assert_ne!(compressed, data);
        }
    }

    #[test]
    fn test_unknown_compression_fails() {
        let (writer, _storage, _temp) = create_test_writer("brotli", 3, true);
        assert!(writer.write(&sample("train")).is_err());
    }

    fn count_files(storage: &LocalStorage, dataset: &str) -> usize {
        let prefix = file_prefix(dataset);
        storage
            .list(Path::new("checkpoints"))
            .unwrap()
            .iter()
            .filter(|e| parse_timestamp(e, &prefix).is_some())
            .count()
    }

    #[test]
    fn test_cleanup_is_per_dataset() {
        let (writer, storage, _temp) = create_test_writer("none", 2, false);

        for _ in 0..4 {
            writer.write(&sample("train")).unwrap();
        }
        writer.write(&sample("train_b")).unwrap();

        assert_eq!(count_files(&storage, "train"), 2);
        assert_eq!(count_files(&storage, "train_b"), 1);
    }

    #[test]
    fn test_cleanup_keeps_datasets_with_similar_names() {
        let (writer, storage, _temp) = create_test_writer("none", 1, true);

        for name in ["a/b", "a b", "a_b"] {
            writer.write(&sample(name)).unwrap();
        }
        writer.write(&sample("a_b")).unwrap();

        for name in ["a/b", "a b", "a_b"] {
            assert_eq!(count_files(&storage, name), 1, "dataset {name:?}");
        }
    }

    #[test]
    fn test_writes_in_the_same_millisecond_get_distinct_files() {
        let (writer, storage, _temp) = create_test_writer("none", 10, true);

        let paths: Vec<PathBuf> = (0..5).map(|_| writer.write(&sample("train")).unwrap()).collect();

        let unique: std::collections::BTreeSet<_> = paths.iter().collect();
        assert_eq!(unique.len(), 5);
        assert_eq!(count_files(&storage, "train"), 5);
    }
}
