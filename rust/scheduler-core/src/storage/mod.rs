// rust/scheduler-core/src/storage/mod.rs

//! Storage abstraction used to persist checkpoints.
//!
//! # Example
//!
//! ```no_run
//! use scheduler_core::config::StorageConfig;
//! use scheduler_core::storage::{LocalStorage, StorageBackend};
//! use std::io::Write;
//! use std::path::Path;
//!
//! let storage = LocalStorage::new(&StorageConfig::default()).unwrap();
//!
//! let mut writer = storage.open_write(Path::new("example.txt")).unwrap();
//! writer.write_all(b"Hello, world!").unwrap();
//! writer.finish().unwrap();
//! ```

mod local;
mod traits;

pub use local::LocalStorage;
pub use traits::{StorageBackend, StorageReader, StorageWriter};
