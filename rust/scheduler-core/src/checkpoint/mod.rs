// rust/scheduler-core/src/checkpoint/mod.rs

//! Scheduling-state checkpoints.
//!
//! A [`DatasetCheckpoint`] captures one dataset's pending, in-flight and
//! completed work together with its splitter cursor. It is encoded as
//! versioned JSON and can be persisted with a [`CheckpointStore`]:
//!
//! ```text
//! +--------------------------+
//! | Header Length (4 bytes)  |  <- u32 little-endian
//! +--------------------------+
//! | Header (bincode)         |  <- magic "SSCK", version, compression,
//! |                          |     XXHash64 checksum, metadata
//! +--------------------------+
//! | Compressed JSON payload  |  <- none, lz4 or zstd
//! +--------------------------+
//! ```
//!
//! Files are named `<dataset>_<unix millis>.ckpt`, written atomically and
//! pruned to the newest `keep_last_n` per dataset.
//!
//! # Example
//!
//! ```no_run
//! use scheduler_core::checkpoint::CheckpointStore;
//! use scheduler_core::config::{CheckpointConfig, StorageConfig};
//! use scheduler_core::storage::LocalStorage;
//! use std::sync::Arc;
//!
//! let storage = Arc::new(LocalStorage::new(&StorageConfig::default()).unwrap());
//! let store = CheckpointStore::new(storage, CheckpointConfig::default());
//!
//! if let Some(checkpoint) = store.load_latest("train").unwrap() {
//!     println!("{} shards left", checkpoint.remaining_shards());
//! }
//! ```

mod codec;
mod format;
mod reader;
mod store;
mod writer;

pub use codec::{DatasetCheckpoint, CHECKPOINT_VERSION};
pub use format::{CheckpointHeader, CHECKPOINT_SUFFIX};
pub use reader::CheckpointReader;
pub use store::CheckpointStore;
pub use writer::CheckpointWriter;
