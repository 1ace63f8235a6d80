// rust/scheduler-core/src/checkpoint/reader.rs

//! Checkpoint reader implementation.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, SchedulerError};
use crate::storage::StorageBackend;

use super::codec::DatasetCheckpoint;
use super::format::{checksum, file_prefix, parse_timestamp, CheckpointHeader};

/// Reads and verifies dataset checkpoints.
///
/// The `CheckpointReader` handles:
/// - Reading checkpoint files
/// - Decompressing the payload with the recorded algorithm
/// - Verifying checksums and sizes
/// - Locating the newest checkpoint of a dataset
pub struct CheckpointReader {
    storage: Arc<dyn StorageBackend>,
    checkpoint_dir: PathBuf,
}

impl CheckpointReader {
    pub fn new(storage: Arc<dyn StorageBackend>, checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    /// Reads, verifies and decodes a checkpoint file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The magic bytes or version are invalid
    /// - The checksum or size doesn't match
    /// - Decompression or decoding fails
    pub fn read(&self, path: &Path) -> Result<DatasetCheckpoint> {
        let mut reader = self.storage.open_read(path)?;
        let mut file_data = Vec::new();
        reader.read_to_end(&mut file_data).map_err(|e| {
            SchedulerError::storage_with_source(path, "failed to read checkpoint file", e)
        })?;

        let (header, payload) = split_header(&file_data)?;

        let decompressed = decompress(payload, &header.compression)?;

        let computed = checksum(&decompressed);
        if computed != header.checksum {
            return Err(SchedulerError::checkpoint(format!(
                "checksum mismatch: expected {}, got {}",
                header.checksum, computed
            )));
        }

        if decompressed.len() as u64 != header.uncompressed_size {
            return Err(SchedulerError::checkpoint(format!(
                "size mismatch: expected {}, got {}",
                header.uncompressed_size,
                decompressed.len()
            )));
        }

        let checkpoint = DatasetCheckpoint::from_slice(&decompressed)?;
        if let Some(dataset) = header.dataset() {
            if dataset != checkpoint.dataset_name {
                return Err(SchedulerError::checkpoint(format!(
                    "header names dataset '{}' but payload holds '{}'",
                    dataset, checkpoint.dataset_name
                )));
            }
        }
        Ok(checkpoint)
    }

    /// Checkpoint files of a dataset, oldest first.
    pub fn list_checkpoints(&self, dataset: &str) -> Result<Vec<PathBuf>> {
        let prefix = file_prefix(dataset);
        let mut matching: Vec<(u128, String)> = self
            .storage
            .list(&self.checkpoint_dir)?
            .into_iter()
            .filter_map(|name| parse_timestamp(&name, &prefix).map(|ts| (ts, name)))
            .collect();
        matching.sort();

        Ok(matching
            .into_iter()
            .map(|(_, name)| self.checkpoint_dir.join(name))
            .collect())
    }

    /// Newest readable checkpoint of a dataset.
    ///
    /// Corrupt files and files written for another dataset are skipped with a
    /// warning.
    pub fn load_latest(&self, dataset: &str) -> Result<Option<DatasetCheckpoint>> {
        for path in self.list_checkpoints(dataset)?.iter().rev() {
            match self.read(path) {
                Ok(checkpoint) if checkpoint.dataset_name == dataset => return Ok(Some(checkpoint)),
                Ok(checkpoint) => {
                    tracing::warn!(
                        path = %path.display(),
                        found = %checkpoint.dataset_name,
                        expected = %dataset,
                        "skipping checkpoint of another dataset"
                    );
                }
                Err(e) => {
                    tracing::warn!("Failed to read checkpoint {}: {}", path.display(), e);
                }
            }
        }
        Ok(None)
    }
}

fn decode_header(bytes: &[u8]) -> Result<CheckpointHeader> {
    let header: CheckpointHeader = bincode::deserialize(bytes)
        .map_err(|e| SchedulerError::checkpoint(format!("failed to deserialize header: {e}")))?;

    if !header.validate_magic() {
        return Err(SchedulerError::checkpoint(format!(
            "invalid magic bytes: expected {:?}, got {:?}",
            CheckpointHeader::MAGIC,
            header.magic
        )));
    }

    if !header.validate_version() {
        return Err(SchedulerError::checkpoint(format!(
            "unsupported version: expected {}, got {}",
            CheckpointHeader::VERSION,
            header.version
        )));
    }

    Ok(header)
}

fn split_header(file_data: &[u8]) -> Result<(CheckpointHeader, &[u8])> {
    let Some((len_bytes, rest)) = file_data.split_first_chunk::<4>() else {
        return Err(SchedulerError::checkpoint("checkpoint file too small"));
    };
    let header_len = u32::from_le_bytes(*len_bytes) as usize;

    if rest.len() < header_len {
        return Err(SchedulerError::checkpoint(
            "checkpoint file truncated: header incomplete",
        ));
    }

    let (header_bytes, payload) = rest.split_at(header_len);
    Ok((decode_header(header_bytes)?, payload))
}

fn decompress(data: &[u8], compression: &str) -> Result<Vec<u8>> {
    match compression {
        "none" => Ok(data.to_vec()),
        "lz4" => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| SchedulerError::checkpoint(format!("lz4 decompression failed: {e}"))),
        "zstd" => zstd::decode_all(data)
            .map_err(|e| SchedulerError::checkpoint_with_source("zstd decompression failed", e)),
        _ => Err(SchedulerError::checkpoint(format!(
            "unknown compression algorithm: {compression}"
        ))),
    }
}
