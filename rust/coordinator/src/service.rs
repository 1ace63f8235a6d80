//! Transport-agnostic request handling for the coordinator.

use std::sync::Arc;

use scheduler_core::checkpoint::CheckpointStore;
use scheduler_core::protocol::{TaskRequest, TaskResponse, TaskResultAck, TaskResultReport};
use scheduler_core::{DatasetCheckpoint, Result, TaskManager};

/// Maps worker requests and persistence calls onto a [`TaskManager`].
#[derive(Clone)]
pub struct CoordinatorService {
    manager: Arc<TaskManager>,
    store: Option<Arc<CheckpointStore>>,
}

impl CoordinatorService {
    pub fn new(manager: Arc<TaskManager>, store: Option<Arc<CheckpointStore>>) -> Self {
        Self { manager, store }
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    pub async fn request_task(&self, request: &TaskRequest) -> TaskResponse {
        let task = self
            .manager
            .get_dataset_task(request.worker_id, &request.dataset_name)
            .await;
        TaskResponse::new(task)
    }

    pub async fn report_task_result(&self, report: &TaskResultReport) -> Result<TaskResultAck> {
        let (task, worker_id) = self
            .manager
            .report_dataset_task(&report.request(), report.success)
            .await?;

        if !report.success {
            tracing::info!(
                dataset = %report.dataset_name,
                task_id = report.task_id,
                worker_id,
                "worker reported task failure"
            );
        }
        Ok(TaskResultAck { task, worker_id })
    }

    pub async fn get_checkpoint(&self, dataset_name: &str) -> Option<DatasetCheckpoint> {
        self.manager.get_dataset_checkpoint(dataset_name).await
    }

    pub async fn restore_from_checkpoint(&self, checkpoint: DatasetCheckpoint) -> bool {
        self.manager.restore_checkpoint(checkpoint).await
    }

    /// Writes a checkpoint of every dataset to the store.
    ///
    /// Returns how many were written. Snapshots are taken under the manager
    /// lock; file I/O happens after it is released.
    pub async fn persist_checkpoints(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut written = 0;
        for name in self.manager.dataset_names().await {
            let Some(checkpoint) = self.manager.get_dataset_checkpoint(&name).await else {
                continue;
            };
            let store = store.clone();
            let path = tokio::task::spawn_blocking(move || store.save(&checkpoint))
                .await
                .map_err(|e| {
                    scheduler_core::SchedulerError::checkpoint(format!(
                        "checkpoint task for dataset '{name}' panicked: {e}"
                    ))
                })??;
            tracing::debug!(dataset = %name, path = %path.display(), "checkpoint written");
            written += 1;
        }
        Ok(written)
    }

    /// Restores every dataset from its newest stored checkpoint.
    ///
    /// Datasets without a usable checkpoint start fresh. Returns how many
    /// were restored.
    pub async fn restore_latest_checkpoints(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };

        let mut restored = 0;
        for name in self.manager.dataset_names().await {
            let loaded = {
                let store = store.clone();
                let name = name.clone();
                tokio::task::spawn_blocking(move || store.load_latest(&name)).await
            };
            let loaded = match loaded {
                Ok(loaded) => loaded,
                Err(e) => {
                    tracing::warn!(dataset = %name, error = %e, "checkpoint load task panicked");
                    continue;
                }
            };
            match loaded {
                Ok(Some(checkpoint)) => {
                    if self.manager.restore_checkpoint(checkpoint).await {
                        restored += 1;
                    }
                }
                Ok(None) => {
                    tracing::info!(dataset = %name, "no checkpoint found, starting fresh");
                }
                Err(e) => {
                    tracing::warn!(dataset = %name, error = %e, "failed to load checkpoint");
                }
            }
        }
        restored
    }
}
