// rust/scheduler-core/src/shard/task_manager.rs

//! Worker-facing task dispatch across all datasets.
//!
//! All dataset state sits behind one async mutex. The timeout detector takes
//! the same lock to snapshot in-flight leases and invokes the registered
//! callbacks only after releasing it, so a callback may call back into the
//! manager (typically [`TaskManager::recover_tasks`]).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::dataset_manager::DatasetManager;
use super::splitter::{create_dataset_splitter, SplitterParams};
use super::task::{DoingTask, Task, TaskId, TaskKind, WorkerId};
use crate::checkpoint::DatasetCheckpoint;
use crate::clock::{Clock, SystemClock};
use crate::config::{DatasetParams, TaskConfig};
use crate::error::{Result, SchedulerError};
use crate::monitor::SpeedMonitor;
use crate::protocol::ReportTaskResultRequest;

/// Observer invoked with the id of a worker judged unresponsive.
pub type TaskTimeoutCallback = Arc<dyn Fn(WorkerId) + Send + Sync>;

#[derive(Default)]
struct TaskManagerState {
    /// Datasets in creation order.
    datasets: Vec<DatasetManager>,
    /// Last time each worker was handed a task or reported one.
    worker_start_task_time: HashMap<WorkerId, DateTime<Utc>>,
    timeout_callbacks: Vec<TaskTimeoutCallback>,
}

impl TaskManagerState {
    fn dataset(&self, name: &str) -> Option<&DatasetManager> {
        self.datasets.iter().find(|d| d.name() == name)
    }

    fn dataset_mut(&mut self, name: &str) -> Option<&mut DatasetManager> {
        self.datasets.iter_mut().find(|d| d.name() == name)
    }
}

/// Creates and dispatches tasks and tracks their lifecycle.
pub struct TaskManager {
    state: Mutex<TaskManagerState>,
    config: TaskConfig,
    speed_monitor: Arc<SpeedMonitor>,
    clock: Arc<dyn Clock>,
}

impl TaskManager {
    pub fn new(config: TaskConfig) -> Self {
        Self {
            state: Mutex::new(TaskManagerState::default()),
            config,
            speed_monitor: Arc::new(SpeedMonitor::new()),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_speed_monitor(mut self, speed_monitor: Arc<SpeedMonitor>) -> Self {
        self.speed_monitor = speed_monitor;
        self
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn speed_monitor(&self) -> &Arc<SpeedMonitor> {
        &self.speed_monitor
    }

    /// Declares a dataset and its sharding parameters.
    ///
    /// The first declaration of a name wins; later ones are ignored. A
    /// negative dataset size is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] if the derived shard size is zero.
    pub async fn new_dataset(&self, params: &DatasetParams) -> Result<()> {
        info!(params = ?params, "set dataset sharding parameters");

        let mut state = self.state.lock().await;
        if state.dataset(&params.dataset_name).is_some() {
            info!(
                dataset = %params.dataset_name,
                "shards for dataset already initialized, ignoring new parameters"
            );
            return Ok(());
        }
        if params.dataset_size < 0 {
            error!(
                dataset = %params.dataset_name,
                dataset_size = params.dataset_size,
                "no shard for dataset with negative size"
            );
            return Ok(());
        }

        let splitter = create_dataset_splitter(&SplitterParams {
            dataset_name: params.dataset_name.clone(),
            dataset_size: params.dataset_size.unsigned_abs(),
            shard_size: params.shard_size(self.config.default_minibatches_per_shard),
            num_epochs: params.num_epochs,
            shuffle: params.shuffle,
            storage_kind: params.storage_kind,
            max_shard_count: self.config.max_shard_count,
            seed: params.seed,
        })?;

        state.datasets.push(DatasetManager::new(
            params.task_kind,
            params.batch_size,
            splitter,
        ));
        Ok(())
    }

    /// Leases the next task of `dataset_name` to `worker_id`.
    ///
    /// Returns `None` for an unknown dataset or when nothing can be handed
    /// out right now. Handing out an evaluation task resets the throughput
    /// monitor.
    pub async fn get_dataset_task(&self, worker_id: WorkerId, dataset_name: &str) -> Option<Task> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let dataset = state.dataset_mut(dataset_name)?;
        let task = dataset.get_task(worker_id, now);
        state.worker_start_task_time.insert(worker_id, now);
        drop(state);

        if let Some(task) = &task {
            debug!(
                dataset = %dataset_name,
                worker_id,
                task_id = task.id(),
                start = task.shard().start,
                end = task.shard().end,
                epoch = task.shard().epoch,
                "task leased"
            );
            if task.kind() == TaskKind::Evaluation {
                // Workers pause training while evaluating.
                self.speed_monitor.reset_running_speed_monitor();
            }
        }
        task
    }

    /// Reports whether a task succeeded and returns it with its worker.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::DatasetNotFound`] for an unknown dataset and
    /// [`SchedulerError::TaskNotFound`] if the task is not in flight.
    pub async fn report_dataset_task(
        &self,
        request: &ReportTaskResultRequest,
        success: bool,
    ) -> Result<(Task, WorkerId)> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        Self::report_locked(&mut state, request, success, now)
    }

    fn report_locked(
        state: &mut TaskManagerState,
        request: &ReportTaskResultRequest,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<(Task, WorkerId)> {
        let dataset = state
            .dataset_mut(&request.dataset_name)
            .ok_or_else(|| SchedulerError::dataset_not_found(&request.dataset_name))?;
        let (_, doing_task) = dataset.report_task_status(request.task_id, success)?;
        state
            .worker_start_task_time
            .insert(doing_task.worker_id, now);
        Ok((doing_task.task, doing_task.worker_id))
    }

    /// Whether at least one dataset exists and every dataset is completed.
    pub async fn finished(&self) -> bool {
        let state = self.state.lock().await;
        !state.datasets.is_empty() && state.datasets.iter().all(DatasetManager::completed)
    }

    /// Releases every lease held by `worker_id`, requeueing the shards.
    ///
    /// Returns the number of released leases; zero when the worker holds none.
    pub async fn recover_tasks(&self, worker_id: WorkerId) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let mut leases = Vec::new();
        for dataset in &state.datasets {
            leases.extend(
                dataset
                    .doing_tasks()
                    .iter()
                    .filter(|(_, doing)| doing.worker_id == worker_id)
                    .map(|(task_id, _)| ReportTaskResultRequest {
                        task_id: *task_id,
                        dataset_name: dataset.name().to_string(),
                    }),
            );
        }

        let mut recovered = 0;
        for request in &leases {
            match Self::report_locked(&mut state, request, false, now) {
                Ok(_) => recovered += 1,
                Err(e) => warn!(
                    worker_id,
                    dataset = %request.dataset_name,
                    task_id = request.task_id,
                    error = %e,
                    "failed to recover task"
                ),
            }
        }

        if recovered > 0 {
            info!(worker_id, recovered, "recovered tasks assigned to worker");
        }
        recovered
    }

    /// Marks `worker_id` as active now.
    pub async fn reset_worker_start_task_time(&self, worker_id: WorkerId) {
        let now = self.clock.now();
        self.state
            .lock()
            .await
            .worker_start_task_time
            .insert(worker_id, now);
    }

    /// Registers an observer for unresponsive workers.
    ///
    /// Observers run in registration order.
    pub async fn set_task_timeout_callback(&self, callback: TaskTimeoutCallback) {
        self.state.lock().await.timeout_callbacks.push(callback);
    }

    /// Runs one timeout scan and returns the workers reported unresponsive.
    ///
    /// Only evaluation leases are checked. At most one worker is reported per
    /// dataset per scan.
    pub async fn check_and_reassign_timeout_tasks(&self) -> Vec<WorkerId> {
        let threshold = chrono::Duration::seconds(
            i64::try_from(self.config.task_timeout_secs).unwrap_or(i64::MAX),
        );

        let (timed_out, callbacks) = {
            let state = self.state.lock().await;
            let now = self.clock.now();
            let mut timed_out = Vec::new();

            for dataset in &state.datasets {
                for (task_id, doing_task) in dataset.doing_tasks() {
                    if doing_task.task.kind() != TaskKind::Evaluation {
                        continue;
                    }
                    let start = state
                        .worker_start_task_time
                        .get(&doing_task.worker_id)
                        .copied()
                        .unwrap_or(doing_task.start_time);
                    if now - start > threshold {
                        info!(
                            dataset = %dataset.name(),
                            worker_id = doing_task.worker_id,
                            task_id = *task_id,
                            "worker timed out with task, relaunch it"
                        );
                        timed_out.push(doing_task.worker_id);
                        break;
                    }
                }
            }
            (timed_out, state.timeout_callbacks.clone())
        };

        for worker_id in &timed_out {
            for callback in &callbacks {
                callback(*worker_id);
            }
        }
        timed_out
    }

    /// Starts the background timeout detector if relaunching timed-out
    /// workers is enabled.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.relaunch_timeout_worker {
            return None;
        }

        let manager = Arc::clone(self);
        let period = Duration::from_secs(self.config.timeout_check_interval_secs.max(1));
        Some(tokio::spawn(async move {
            info!(
                interval_secs = period.as_secs(),
                "started monitoring timeout tasks"
            );
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                manager.check_and_reassign_timeout_tasks().await;
            }
        }))
    }

    /// Snapshot of a dataset's scheduling state, if the dataset exists.
    pub async fn get_dataset_checkpoint(&self, dataset_name: &str) -> Option<DatasetCheckpoint> {
        let state = self.state.lock().await;
        state.dataset(dataset_name).map(DatasetManager::checkpoint)
    }

    /// Replaces a dataset's scheduling state with `checkpoint`.
    ///
    /// Returns `false` and logs if the dataset does not exist or the
    /// checkpoint does not fit it.
    pub async fn restore_checkpoint(&self, checkpoint: DatasetCheckpoint) -> bool {
        let dataset_name = checkpoint.dataset_name.clone();
        let mut state = self.state.lock().await;
        let Some(dataset) = state.dataset_mut(&dataset_name) else {
            error!(dataset = %dataset_name, "no dataset for checkpoint");
            return false;
        };

        let remaining = checkpoint.remaining_shards();
        match dataset.restore_checkpoint(checkpoint) {
            Ok(()) => {
                info!(
                    dataset = %dataset_name,
                    remaining_shards = remaining,
                    epoch = dataset.get_epoch(),
                    "restored dataset shards from checkpoint"
                );
                true
            }
            Err(e) => {
                error!(dataset = %dataset_name, error = %e, "failed to restore shards from checkpoint");
                false
            }
        }
    }

    /// Restores a dataset from a JSON-encoded checkpoint.
    pub async fn restore_dataset_from_checkpoint(&self, checkpoint: &str) -> bool {
        match DatasetCheckpoint::from_json(checkpoint) {
            Ok(checkpoint) => self.restore_checkpoint(checkpoint).await,
            Err(e) => {
                error!(error = %e, "failed to decode dataset checkpoint");
                false
            }
        }
    }

    /// Epochs started by a dataset; 0 and an error log if it is unknown.
    pub async fn get_dataset_epoch(&self, dataset_name: &str) -> u32 {
        let state = self.state.lock().await;
        match state.dataset(dataset_name) {
            Some(dataset) => dataset.get_epoch(),
            None => {
                error!(dataset = %dataset_name, "dataset does not exist");
                0
            }
        }
    }

    /// Training has started once any dataset has a completed step.
    pub async fn training_started(&self) -> bool {
        let state = self.state.lock().await;
        state
            .datasets
            .iter()
            .any(|dataset| dataset.get_completed_step() > 0)
    }

    pub fn remove_running_worker(&self, worker_id: WorkerId) {
        self.speed_monitor.remove_running_worker(worker_id);
    }

    /// Dataset names in creation order.
    pub async fn dataset_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .datasets
            .iter()
            .map(|dataset| dataset.name().to_string())
            .collect()
    }

    pub async fn get_doing_tasks(&self, dataset_name: &str) -> Option<BTreeMap<TaskId, DoingTask>> {
        let state = self.state.lock().await;
        state.dataset(dataset_name).map(DatasetManager::get_doing_tasks)
    }

    pub async fn dataset_completed(&self, dataset_name: &str) -> Option<bool> {
        let state = self.state.lock().await;
        state.dataset(dataset_name).map(DatasetManager::completed)
    }

    pub async fn get_completed_step(&self, dataset_name: &str) -> Option<u64> {
        let state = self.state.lock().await;
        state
            .dataset(dataset_name)
            .map(DatasetManager::get_completed_step)
    }
}
