// rust/scheduler-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

use crate::shard::TaskId;

#[derive(Error, Debug)]
pub enum SchedulerError {

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("There is no dataset shard for the dataset '{name}'")]
    DatasetNotFound {
        name: String,
    },

    #[error("Task {task_id} of dataset '{dataset}' is not in flight")]
    TaskNotFound {
        dataset: String,
        task_id: TaskId,
    },

    #[error("Cannot restore dataset '{dataset}': {message}")]
    Restore {
        dataset: String,
        message: String,
    },

    #[error("Checkpoint error: {message}")]
    Checkpoint {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
    },

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

// Convenience constructors
impl SchedulerError {

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn dataset_not_found(name: impl Into<String>) -> Self {
        Self::DatasetNotFound { name: name.into() }
    }

    pub fn task_not_found(dataset: impl Into<String>, task_id: TaskId) -> Self {
        Self::TaskNotFound {
            dataset: dataset.into(),
            task_id,
        }
    }

    pub fn restore(dataset: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Restore {
            dataset: dataset.into(),
            message: message.into(),
        }
    }

    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint {
            message: message.into(),
            source: None,
        }
    }

    pub fn checkpoint_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Checkpoint {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Whether the error signals a worker/coordinator state desynchronization.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DatasetNotFound { .. } | Self::TaskNotFound { .. })
    }
}
