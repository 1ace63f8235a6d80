// rust/scheduler-core/src/shard/dataset_manager.rs

//! Scheduling state machine of a single dataset.
//!
//! Every task ever created for a dataset lives in exactly one of three
//! collections: `todo` (pending, in emission order), `doing` (leased to a
//! worker) or `completed` (ids only).

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};

use super::splitter::DatasetSplitter;
use super::task::{DoingTask, Shard, Task, TaskId, TaskKind, WorkerId};
use crate::checkpoint::{DatasetCheckpoint, CHECKPOINT_VERSION};
use crate::error::{Result, SchedulerError};

/// Owns the pending, in-flight and completed tasks of one dataset.
#[derive(Debug)]
pub struct DatasetManager {
    kind: TaskKind,
    batch_size: u64,
    splitter: Box<dyn DatasetSplitter>,
    todo: VecDeque<Task>,
    doing: BTreeMap<TaskId, DoingTask>,
    completed: BTreeSet<TaskId>,
    next_task_id: TaskId,
    completed_step: u64,
}

impl DatasetManager {
    pub fn new(kind: TaskKind, batch_size: u64, splitter: Box<dyn DatasetSplitter>) -> Self {
        Self {
            kind,
            batch_size,
            splitter,
            todo: VecDeque::new(),
            doing: BTreeMap::new(),
            completed: BTreeSet::new(),
            next_task_id: 0,
            completed_step: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.splitter.dataset_name()
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Leases the next pending task to `worker_id`.
    ///
    /// Pulls a fresh batch from the splitter when nothing is pending. `None`
    /// means nothing can be handed out right now; whether the dataset is
    /// done is answered by [`completed`](Self::completed).
    pub fn get_task(&mut self, worker_id: WorkerId, now: DateTime<Utc>) -> Option<Task> {
        while self.todo.is_empty() && !self.splitter.finished() {
            let shards = self.splitter.next_shards();
            tracing::debug!(
                dataset = %self.name(),
                epoch = self.splitter.epoch(),
                count = shards.len(),
                "created shards"
            );
            for shard in shards {
                let task = Task::new(self.mint_task_id(), self.kind, shard);
                self.todo.push_back(task);
            }
        }

        let task = self.todo.pop_front()?;
        self.doing
            .insert(task.id(), DoingTask::new(task.clone(), worker_id, now));
        Some(task)
    }

    /// Retires or requeues an in-flight task.
    ///
    /// A failed task's shard goes back to the front of the queue under a new
    /// task id.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::TaskNotFound`] if `task_id` is not in flight.
    pub fn report_task_status(&mut self, task_id: TaskId, success: bool) -> Result<(bool, DoingTask)> {
        let doing_task = self
            .doing
            .remove(&task_id)
            .ok_or_else(|| SchedulerError::task_not_found(self.name(), task_id))?;

        if success {
            self.completed.insert(task_id);
            self.completed_step += doing_task.task.shard().len().div_ceil(self.batch_size.max(1));
        } else {
            let retry = doing_task.task.clone().retry(self.mint_task_id());
            tracing::info!(
                dataset = %self.name(),
                worker_id = doing_task.worker_id,
                failed_task = task_id,
                task_id = retry.id(),
                retry_count = retry.retry_count(),
                "requeued failed task"
            );
            self.todo.push_front(retry);
        }

        Ok((success, doing_task))
    }

    /// Snapshot of the tasks currently leased out.
    pub fn get_doing_tasks(&self) -> BTreeMap<TaskId, DoingTask> {
        self.doing.clone()
    }

    pub(crate) fn doing_tasks(&self) -> &BTreeMap<TaskId, DoingTask> {
        &self.doing
    }

    /// Pending tasks in the order they will be handed out.
    pub fn pending_tasks(&self) -> impl Iterator<Item = &Task> {
        self.todo.iter()
    }

    pub fn completed_task_ids(&self) -> &BTreeSet<TaskId> {
        &self.completed
    }

    /// Whether every shard of every epoch has been completed.
    pub fn completed(&self) -> bool {
        self.todo.is_empty() && self.doing.is_empty() && self.splitter.finished()
    }

    /// Number of epochs whose shards have started to be handed out.
    pub fn get_epoch(&self) -> u32 {
        self.splitter.epoch()
    }

    /// Number of minibatch steps covered by completed tasks.
    pub fn get_completed_step(&self) -> u64 {
        self.completed_step
    }

    /// Captures pending, in-flight and completed state plus the splitter cursor.
    pub fn checkpoint(&self) -> DatasetCheckpoint {
        DatasetCheckpoint {
            version: CHECKPOINT_VERSION,
            dataset_name: self.name().to_string(),
            dataset_size: self.splitter.dataset_size(),
            shard_size: self.splitter.shard_size(),
            num_epochs: self.splitter.num_epochs(),
            shuffle: self.splitter.shuffle(),
            storage_kind: self.splitter.storage_kind(),
            splitter: self.splitter.cursor(),
            todo: self.todo.iter().map(|t| t.shard().clone()).collect(),
            doing: self.doing.values().map(|d| d.task.shard().clone()).collect(),
            completed_task_ids: self.completed.iter().copied().collect(),
            next_task_id: self.next_task_id,
            completed_step: self.completed_step,
            epoch: self.splitter.epoch(),
        }
    }

    /// Replaces all scheduling state with the checkpoint's.
    ///
    /// Shards that were in flight are queued ahead of the pending ones; no
    /// lease survives a restore.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Restore`] and leaves the state untouched if
    /// the checkpoint belongs to another dataset or was split with different
    /// settings.
    pub fn restore_checkpoint(&mut self, checkpoint: DatasetCheckpoint) -> Result<()> {
        self.validate_checkpoint(&checkpoint)?;

        let first_free_id = checkpoint
            .completed_task_ids
            .iter()
            .max()
            .map_or(0, |id| id + 1);
        self.next_task_id = checkpoint.next_task_id.max(first_free_id);

        let shards: Vec<Shard> = checkpoint
            .doing
            .into_iter()
            .chain(checkpoint.todo)
            .collect();
        self.todo.clear();
        for shard in shards {
            let task = Task::new(self.mint_task_id(), self.kind, shard);
            self.todo.push_back(task);
        }

        self.doing.clear();
        self.completed = checkpoint.completed_task_ids.into_iter().collect();
        self.completed_step = checkpoint.completed_step;
        self.splitter.restore_cursor(checkpoint.splitter);
        Ok(())
    }

    fn validate_checkpoint(&self, checkpoint: &DatasetCheckpoint) -> Result<()> {
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(SchedulerError::restore(
                &checkpoint.dataset_name,
                format!(
                    "unsupported checkpoint version {} (expected {})",
                    checkpoint.version, CHECKPOINT_VERSION
                ),
            ));
        }
        if checkpoint.dataset_name != self.name() {
            return Err(SchedulerError::restore(
                &checkpoint.dataset_name,
                format!("checkpoint does not belong to dataset '{}'", self.name()),
            ));
        }
        if checkpoint.dataset_size != self.splitter.dataset_size()
            || checkpoint.shard_size != self.splitter.shard_size()
        {
            return Err(SchedulerError::restore(
                &checkpoint.dataset_name,
                format!(
                    "split geometry mismatch: checkpoint has size={} shard={}, dataset has size={} shard={}",
                    checkpoint.dataset_size,
                    checkpoint.shard_size,
                    self.splitter.dataset_size(),
                    self.splitter.shard_size()
                ),
            ));
        }
        if checkpoint.num_epochs != self.splitter.num_epochs()
            || checkpoint.shuffle != self.splitter.shuffle()
            || checkpoint.storage_kind != self.splitter.storage_kind()
        {
            return Err(SchedulerError::restore(
                &checkpoint.dataset_name,
                format!(
                    "split settings mismatch: checkpoint has epochs={} shuffle={} storage={:?}, \
                     dataset has epochs={} shuffle={} storage={:?}",
                    checkpoint.num_epochs,
                    checkpoint.shuffle,
                    checkpoint.storage_kind,
                    self.splitter.num_epochs(),
                    self.splitter.shuffle(),
                    self.splitter.storage_kind()
                ),
            ));
        }
        Ok(())
    }

    fn mint_task_id(&mut self) -> TaskId {
        let id = self.next_task_id;
        self.next_task_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::splitter::{create_dataset_splitter, SplitterParams, StorageKind};

    fn split_params(dataset_size: u64, shard_size: u64, num_epochs: u32) -> SplitterParams {
        SplitterParams {
            dataset_name: "train".to_string(),
            dataset_size,
            shard_size,
            num_epochs,
            shuffle: false,
            storage_kind: StorageKind::Table,
            max_shard_count: 3,
            seed: Some(1),
        }
    }

    fn manager_with(params: &SplitterParams, batch_size: u64) -> DatasetManager {
        let splitter = create_dataset_splitter(params).unwrap();
        DatasetManager::new(TaskKind::Normal, batch_size, splitter)
    }

    fn make_manager(dataset_size: u64, shard_size: u64, num_epochs: u32, batch_size: u64) -> DatasetManager {
        manager_with(&split_params(dataset_size, shard_size, num_epochs), batch_size)
    }

    fn bounds(task: &Task) -> (u64, u64) {
        (task.shard().start, task.shard().end)
    }

    fn assert_disjoint(manager: &DatasetManager) {
        let pending: BTreeSet<TaskId> = manager.pending_tasks().map(Task::id).collect();
        let doing: BTreeSet<TaskId> = manager.get_doing_tasks().keys().copied().collect();
        let completed = manager.completed_task_ids();

        assert!(pending.is_disjoint(&doing));
        assert!(pending.is_disjoint(completed));
        assert!(doing.is_disjoint(completed));
    }

    #[test]
    fn test_get_task_moves_to_doing() {
        let mut manager = make_manager(10, 2, 1, 1);
        let now = Utc::now();

        let task = manager.get_task(4, now).unwrap();
        let doing = manager.get_doing_tasks();

        assert_eq!(doing.len(), 1);
        assert_eq!(doing[&task.id()].worker_id, 4);
        assert_eq!(doing[&task.id()].start_time, now);
        assert_disjoint(&manager);
    }

    #[test]
    fn test_exhausted_dataset_returns_none() {
        let mut manager = make_manager(3, 2, 1, 1);
        let now = Utc::now();

        assert!(manager.get_task(1, now).is_some());
        assert!(manager.get_task(1, now).is_some());
        assert!(manager.get_task(1, now).is_none());
        assert!(!manager.completed());
    }

    #[test]
    fn test_success_completes_task() {
        let mut manager = make_manager(4, 2, 1, 1);
        let now = Utc::now();

        let t1 = manager.get_task(1, now).unwrap();
        let t2 = manager.get_task(2, now).unwrap();
        let (ok, doing) = manager.report_task_status(t1.id(), true).unwrap();
        assert!(ok);
        assert_eq!(doing.worker_id, 1);
        manager.report_task_status(t2.id(), true).unwrap();

        assert!(manager.completed());
        assert_eq!(manager.get_completed_step(), 4);
        assert_disjoint(&manager);
    }

    #[test]
    fn test_failure_requeues_at_front_with_new_id() {
        let mut manager = make_manager(10, 2, 1, 1);
        let now = Utc::now();

        let failed = manager.get_task(1, now).unwrap();
        manager.report_task_status(failed.id(), false).unwrap();

        let retried = manager.get_task(2, now).unwrap();
        assert_eq!(bounds(&retried), bounds(&failed));
        assert_ne!(retried.id(), failed.id());
        assert_eq!(retried.retry_count(), 1);
        assert!(!manager.completed_task_ids().contains(&failed.id()));
        assert_disjoint(&manager);
    }

    #[test]
    fn test_unknown_task_is_not_found() {
        let mut manager = make_manager(10, 2, 1, 1);
        let err = manager.report_task_status(42, true).unwrap_err();
        assert!(matches!(err, SchedulerError::TaskNotFound { task_id: 42, .. }));
    }

    #[test]
    fn test_double_report_is_not_found() {
        let mut manager = make_manager(10, 2, 1, 1);
        let task = manager.get_task(1, Utc::now()).unwrap();

        manager.report_task_status(task.id(), true).unwrap();
        assert!(manager.report_task_status(task.id(), true).unwrap_err().is_not_found());
    }

    #[test]
    fn test_completed_step_rounds_partial_batches_up() {
        let mut manager = make_manager(5, 5, 1, 2);
        let task = manager.get_task(1, Utc::now()).unwrap();
        manager.report_task_status(task.id(), true).unwrap();

        assert_eq!(manager.get_completed_step(), 3);
    }

    #[test]
    fn test_checkpoint_restore_keeps_remaining_work() {
        let mut manager = make_manager(20, 2, 2, 1);
        let now = Utc::now();

        let done = manager.get_task(1, now).unwrap();
        manager.report_task_status(done.id(), true).unwrap();
        let in_flight = manager.get_task(2, now).unwrap();

        let checkpoint = manager.checkpoint();
        let mut remaining: Vec<Shard> = checkpoint.doing.iter().chain(&checkpoint.todo).cloned().collect();

        manager.restore_checkpoint(checkpoint.clone()).unwrap();

        assert!(manager.get_doing_tasks().is_empty());
        assert!(manager.completed_task_ids().contains(&done.id()));
        let mut restored: Vec<Shard> = manager.pending_tasks().map(|t| t.shard().clone()).collect();
        assert_eq!(restored.first(), Some(in_flight.shard()));
        remaining.sort_by_key(|s| (s.epoch, s.start));
        restored.sort_by_key(|s| (s.epoch, s.start));
        assert_eq!(restored, remaining);
        assert_disjoint(&manager);
    }

    #[test]
    fn test_restore_into_fresh_manager_finishes_without_duplicates() {
        let mut source = make_manager(12, 2, 1, 1);
        let now = Utc::now();
        for _ in 0..2 {
            let task = source.get_task(1, now).unwrap();
            source.report_task_status(task.id(), true).unwrap();
        }
        source.get_task(1, now).unwrap();

        let mut target = make_manager(12, 2, 1, 1);
        target.restore_checkpoint(source.checkpoint()).unwrap();

        let mut starts = Vec::new();
        while let Some(task) = target.get_task(9, now) {
            starts.push(task.shard().start);
            target.report_task_status(task.id(), true).unwrap();
        }
        starts.sort();

        assert_eq!(starts, vec![4, 6, 8, 10]);
        assert!(target.completed());
    }

    #[test]
    fn test_restore_rejects_other_dataset() {
        let mut manager = make_manager(10, 2, 1, 1);
        let mut checkpoint = manager.checkpoint();
        checkpoint.dataset_name = "eval".to_string();

        let err = manager.restore_checkpoint(checkpoint).unwrap_err();
        assert!(matches!(err, SchedulerError::Restore { .. }));
    }

    #[test]
    fn test_restore_rejects_geometry_mismatch() {
        let mut manager = make_manager(10, 2, 1, 1);
        let task = manager.get_task(1, Utc::now()).unwrap();
        let mut checkpoint = manager.checkpoint();
        checkpoint.shard_size = 5;

        assert!(manager.restore_checkpoint(checkpoint).is_err());
        // State is untouched.
        assert!(manager.get_doing_tasks().contains_key(&task.id()));
    }

    #[test]
    fn test_restore_under_different_batch_limit_covers_every_shard() {
        for (shuffle, storage_kind) in [
            (false, StorageKind::Table),
            (true, StorageKind::Table),
            (true, StorageKind::Text),
        ] {
            let mut params = split_params(10, 1, 1);
            params.shuffle = shuffle;
            params.storage_kind = storage_kind;
            params.max_shard_count = 2;
            let now = Utc::now();

            let mut source = manager_with(&params, 1);
            let done = source.get_task(1, now).unwrap();
            source.report_task_status(done.id(), true).unwrap();
            let checkpoint = source.checkpoint();

            params.max_shard_count = 5;
            let mut target = manager_with(&params, 1);
            target.restore_checkpoint(checkpoint).unwrap();

            let mut starts = vec![done.shard().start];
            while let Some(task) = target.get_task(2, now) {
                starts.push(task.shard().start);
                target.report_task_status(task.id(), true).unwrap();
            }
            starts.sort();

            assert_eq!(starts, (0..10).collect::<Vec<u64>>(), "shuffle={shuffle} kind={storage_kind:?}");
            assert!(target.completed());
        }
    }

    #[test]
    fn test_restore_rejects_changed_split_settings() {
        let base = split_params(10, 2, 2);
        let mut source = manager_with(&base, 1);
        source.get_task(1, Utc::now()).unwrap();
        let checkpoint = source.checkpoint();

        let mut shuffled = base.clone();
        shuffled.shuffle = true;
        let mut text = base.clone();
        text.storage_kind = StorageKind::Text;
        let mut longer = base.clone();
        longer.num_epochs = 3;

        for params in [shuffled, text, longer] {
            let mut target = manager_with(&params, 1);
            let task = target.get_task(7, Utc::now()).unwrap();

            let err = target.restore_checkpoint(checkpoint.clone()).unwrap_err();
            assert!(matches!(err, SchedulerError::Restore { .. }));
            assert!(target.get_doing_tasks().contains_key(&task.id()));
            assert_eq!(target.get_epoch(), 1);
        }
    }

    #[test]
    fn test_restored_task_ids_do_not_collide() {
        let mut manager = make_manager(10, 2, 1, 1);
        let now = Utc::now();
        let task = manager.get_task(1, now).unwrap();
        manager.report_task_status(task.id(), true).unwrap();

        let mut checkpoint = manager.checkpoint();
        checkpoint.next_task_id = 0;
        manager.restore_checkpoint(checkpoint).unwrap();

        assert!(manager.pending_tasks().all(|t| t.id() > task.id()));
    }
}
