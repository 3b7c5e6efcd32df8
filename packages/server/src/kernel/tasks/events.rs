use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Task, TaskStatus};

/// Progress event pushed to live observers of a task.
///
/// Serialized as `{task_id, status, progress, message, result?, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub progress: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskEvent {
    /// Intermediate progress of a running task.
    pub fn progress(task_id: Uuid, progress: i32, message: impl Into<String>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Running,
            progress,
            message: message.into(),
            result: None,
            error: None,
        }
    }

    /// Snapshot of a persisted task, carrying its result or error when settled.
    pub fn from_task(task: &Task, message: impl Into<String>) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            progress: task.progress,
            message: message.into(),
            result: task.result.clone(),
            error: task.error.clone(),
        }
    }
}
