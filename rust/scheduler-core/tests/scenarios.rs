use std::collections::BTreeMap;
use std::sync::Arc;

use scheduler_core::checkpoint::CheckpointStore;
use scheduler_core::config::{CheckpointConfig, StorageConfig};
use scheduler_core::protocol::ReportTaskResultRequest;
use scheduler_core::{
    DatasetParams, LocalStorage, StorageKind, Task, TaskConfig, TaskManager, WorkerId,
};
use tempfile::TempDir;

type Coverage = BTreeMap<(u32, u64), usize>;

fn record(coverage: &mut Coverage, task: &Task) {
    for index in task.shard().indices() {
        *coverage.entry((task.shard().epoch, index)).or_default() += 1;
    }
}

fn assert_exact_cover(coverage: &Coverage, dataset_size: u64, num_epochs: u32) {
    assert_eq!(coverage.len() as u64, dataset_size * u64::from(num_epochs));
    for epoch in 0..num_epochs {
        for index in 0..dataset_size {
            assert_eq!(
                coverage.get(&(epoch, index)),
                Some(&1),
                "epoch {epoch} index {index}"
            );
        }
    }
}

async fn complete(manager: &TaskManager, task: &Task) {
    let request = ReportTaskResultRequest {
        task_id: task.id(),
        dataset_name: task.shard().name.clone(),
    };
    manager.report_dataset_task(&request, true).await.unwrap();
}

/// Leases and completes tasks until none are left.
async fn drain(manager: &TaskManager, worker_id: WorkerId, name: &str, coverage: &mut Coverage) {
    while let Some(task) = manager.get_dataset_task(worker_id, name).await {
        record(coverage, &task);
        complete(manager, &task).await;
    }
}

fn small_batches() -> TaskConfig {
    TaskConfig {
        max_shard_count: 4,
        ..Default::default()
    }
}

#[tokio::test]
async fn shuffled_epochs_cover_every_index_once() {
    for storage_kind in [StorageKind::Table, StorageKind::Text] {
        let manager = TaskManager::new(small_batches());
        let params = DatasetParams::new("train", 4, 103)
            .with_epochs(3)
            .with_minibatches_per_shard(2)
            .with_shuffle(true, Some(99))
            .with_storage_kind(storage_kind);
        manager.new_dataset(&params).await.unwrap();

        let mut coverage = Coverage::new();
        drain(&manager, 1, "train", &mut coverage).await;

        assert_exact_cover(&coverage, 103, 3);
        assert!(manager.finished().await);
        assert_eq!(manager.get_dataset_epoch("train").await, 3);
    }
}

#[tokio::test]
async fn empty_dataset_is_immediately_finished() {
    let manager = TaskManager::new(TaskConfig::default());
    manager
        .new_dataset(&DatasetParams::new("empty", 8, 0))
        .await
        .unwrap();

    assert!(manager.get_dataset_task(1, "empty").await.is_none());
    assert!(manager.finished().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_never_share_a_shard() {
    let manager = Arc::new(TaskManager::new(small_batches()));
    manager
        .new_dataset(
            &DatasetParams::new("train", 1, 500)
                .with_epochs(2)
                .with_minibatches_per_shard(3)
                .with_shuffle(true, Some(5)),
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for worker_id in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let mut coverage = Coverage::new();
            drain(&manager, worker_id, "train", &mut coverage).await;
            coverage
        }));
    }

    let mut coverage = Coverage::new();
    for handle in handles {
        for (key, count) in handle.await.unwrap() {
            *coverage.entry(key).or_default() += count;
        }
    }
    assert_exact_cover(&coverage, 500, 2);
}

#[tokio::test]
async fn restart_resumes_from_persisted_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(
        LocalStorage::new(&StorageConfig {
            base_path: temp_dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap(),
    );
    let store = CheckpointStore::new(
        storage,
        CheckpointConfig {
            checkpoint_dir: "ckpt".into(),
            compression: "zstd".to_string(),
            ..Default::default()
        },
    );

    let params = DatasetParams::new("train", 2, 61)
        .with_epochs(2)
        .with_minibatches_per_shard(3)
        .with_shuffle(true, Some(17))
        .with_storage_kind(StorageKind::Text);

    let mut coverage = Coverage::new();
    {
        let before = TaskManager::new(small_batches());
        before.new_dataset(&params).await.unwrap();

        for _ in 0..7 {
            let task = before.get_dataset_task(1, "train").await.unwrap();
            record(&mut coverage, &task);
            complete(&before, &task).await;
        }
        // leased but never reported; must be handed out again after restart
        before.get_dataset_task(2, "train").await.unwrap();
        before.get_dataset_task(3, "train").await.unwrap();

        let checkpoint = before.get_dataset_checkpoint("train").await.unwrap();
        store.save(&checkpoint).unwrap();
    }

    let after = TaskManager::new(small_batches());
    after.new_dataset(&params).await.unwrap();
    let checkpoint = store.load_latest("train").unwrap().unwrap();
    assert!(after.restore_checkpoint(checkpoint).await);
    assert!(after.training_started().await);

    drain(&after, 4, "train", &mut coverage).await;
    assert_exact_cover(&coverage, 61, 2);
    assert!(after.finished().await);
}

#[tokio::test]
async fn restart_with_different_batch_limit_keeps_coverage() {
    let params = DatasetParams::new("train", 1, 10)
        .with_minibatches_per_shard(1)
        .with_shuffle(true, Some(3));

    let before = TaskManager::new(TaskConfig {
        max_shard_count: 2,
        ..Default::default()
    });
    before.new_dataset(&params).await.unwrap();
    let mut coverage = Coverage::new();
    let task = before.get_dataset_task(1, "train").await.unwrap();
    record(&mut coverage, &task);
    complete(&before, &task).await;
    let checkpoint = before.get_dataset_checkpoint("train").await.unwrap();

    let after = TaskManager::new(TaskConfig {
        max_shard_count: 5,
        ..Default::default()
    });
    after.new_dataset(&params).await.unwrap();
    assert!(after.restore_checkpoint(checkpoint).await);

    drain(&after, 2, "train", &mut coverage).await;
    assert_exact_cover(&coverage, 10, 1);
    assert!(after.finished().await);
}

#[tokio::test]
async fn restart_with_changed_shuffle_is_rejected() {
    let before = TaskManager::new(TaskConfig::default());
    before
        .new_dataset(&DatasetParams::new("train", 2, 20).with_shuffle(false, None))
        .await
        .unwrap();
    before.get_dataset_task(1, "train").await.unwrap();
    let checkpoint = before.get_dataset_checkpoint("train").await.unwrap();

    let after = TaskManager::new(TaskConfig::default());
    after
        .new_dataset(&DatasetParams::new("train", 2, 20).with_shuffle(true, Some(1)))
        .await
        .unwrap();
    assert!(!after.restore_checkpoint(checkpoint).await);
    assert!(!after.training_started().await);
}

#[tokio::test]
async fn failed_shards_are_retried_until_done() {
    let manager = TaskManager::new(TaskConfig::default());
    manager
        .new_dataset(&DatasetParams::new("train", 5, 50).with_minibatches_per_shard(1))
        .await
        .unwrap();

    let mut coverage = Coverage::new();
    let mut failures = 0;
    while let Some(task) = manager.get_dataset_task(1, "train").await {
        let request = ReportTaskResultRequest {
            task_id: task.id(),
            dataset_name: "train".to_string(),
        };
        // every shard fails on its first attempt
        let success = task.retry_count() > 0;
        if success {
            record(&mut coverage, &task);
        } else {
            failures += 1;
        }
        manager.report_dataset_task(&request, success).await.unwrap();
    }

    assert_eq!(failures, 10);
    assert_exact_cover(&coverage, 50, 1);
    assert_eq!(manager.get_completed_step("train").await, Some(10));
}
