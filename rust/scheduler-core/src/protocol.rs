// rust/scheduler-core/src/protocol.rs

//! Request and response shapes exchanged with workers.
//!
//! These are transport-agnostic; any RPC layer can carry them as JSON.

use serde::{Deserialize, Serialize};

use crate::shard::{Task, TaskId, WorkerId};

/// Milliseconds a worker should wait before asking again when no task is
/// available.
pub const DEFAULT_WAIT_MS: u64 = 500;

/// A worker asking for its next task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub worker_id: WorkerId,
    pub dataset_name: String,
}

/// Reply to a [`TaskRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task: Option<Task>,
    /// Back-off hint; zero when a task was handed out.
    pub wait_ms: u64,
}

impl TaskResponse {
    pub fn new(task: Option<Task>) -> Self {
        let wait_ms = if task.is_some() { 0 } else { DEFAULT_WAIT_MS };
        Self { task, wait_ms }
    }
}

/// Identifies the task whose outcome is being reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTaskResultRequest {
    pub task_id: TaskId,
    pub dataset_name: String,
}

/// A worker reporting how a task went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResultReport {
    pub task_id: TaskId,
    pub dataset_name: String,
    pub success: bool,
}

impl TaskResultReport {
    pub fn request(&self) -> ReportTaskResultRequest {
        ReportTaskResultRequest {
            task_id: self.task_id,
            dataset_name: self.dataset_name.clone(),
        }
    }
}

/// Acknowledgement of a [`TaskResultReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResultAck {
    pub task: Task,
    pub worker_id: WorkerId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::{Shard, TaskKind};

    #[test]
    fn test_task_response_wait_hint() {
        assert_eq!(TaskResponse::new(None).wait_ms, DEFAULT_WAIT_MS);

        let task = Task::new(3, TaskKind::Normal, Shard::new("d", 0, 2, 0));
        assert_eq!(TaskResponse::new(Some(task)).wait_ms, 0);
    }

    #[test]
    fn test_report_json_shape() {
        let report: TaskResultReport =
            serde_json::from_str(r#"{"task_id":4,"dataset_name":"train","success":false}"#)
                .unwrap();
        assert_eq!(
            report.request(),
            ReportTaskResultRequest {
                task_id: 4,
                dataset_name: "train".to_string(),
            }
        );
        assert!(!report.success);
    }
}
