// rust/scheduler-core/src/checkpoint/format.rs

//! On-disk checkpoint file layout.
//!
//! The checkpoint file format is:
//! ```text
//! +--------------------------+
//! | Header Length (4 bytes)  |  <- u32 little-endian
//! +--------------------------+
//! | Header (bincode)         |  <- CheckpointHeader serialized with bincode
//! +--------------------------+
//! | Compressed Payload       |  <- DatasetCheckpoint JSON, compressed per header
//! +--------------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hasher;

use twox_hash::XxHash64;

/// Metadata key holding the dataset name.
pub const META_DATASET: &str = "dataset";

/// Metadata key holding the number of epochs started at snapshot time.
pub const META_EPOCH: &str = "epoch";

/// Header for a checkpoint file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointHeader {
    /// Magic bytes identifying this as a shard checkpoint file ("SSCK")
    pub magic: [u8; 4],
    /// Format version number
    pub version: u32,
    /// Compression algorithm used ("none", "lz4", or "zstd")
    pub compression: String,
    /// Size of the payload before compression
    pub uncompressed_size: u64,
    /// XXHash64 checksum of the uncompressed payload
    pub checksum: u64,
    /// Free-form metadata, see `META_*`
    pub metadata: HashMap<String, String>,
}

impl CheckpointHeader {
    pub const MAGIC: [u8; 4] = *b"SSCK";

    pub const VERSION: u32 = 1;

    pub fn new(
        compression: String,
        uncompressed_size: u64,
        checksum: u64,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            compression,
            uncompressed_size,
            checksum,
            metadata,
        }
    }

    pub fn validate_magic(&self) -> bool {
        self.magic == Self::MAGIC
    }

    pub fn validate_version(&self) -> bool {
        self.version == Self::VERSION
    }

    /// Dataset the checkpoint was written for, if recorded.
    pub fn dataset(&self) -> Option<&str> {
        self.metadata.get(META_DATASET).map(String::as_str)
    }
}

/// File extension of checkpoint files.
pub const CHECKPOINT_SUFFIX: &str = ".ckpt";

/// XXHash64 (seed 0) of a payload.
pub(crate) fn checksum(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

/// Filename prefix for a dataset's checkpoints.
///
/// Unsafe characters in the readable stem become `_`; the trailing hash of
/// the full name keeps names that sanitize alike apart.
pub(crate) fn file_prefix(dataset: &str) -> String {
    let stem: String = dataset
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    format!("{stem}-{:016x}_", checksum(dataset.as_bytes()))
}

/// Extracts the timestamp from `<prefix><millis>.ckpt`, if the name matches.
pub(crate) fn parse_timestamp(file_name: &str, prefix: &str) -> Option<u128> {
    let millis = file_name
        .strip_prefix(prefix)?
        .strip_suffix(CHECKPOINT_SUFFIX)?;
    if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    millis.parse().ok()
}
