//! Task model and lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use thiserror::Error;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Status
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// pending → running → {completed, failed}, and {pending, running} → cancelled.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown task status: {0}")]
pub struct ParseStatusError(String);

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

// ============================================================================
// Task Model
// ============================================================================

#[derive(FromRow, Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Task {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,

    #[builder(default)]
    pub owner_id: Option<String>,
    pub crawler_type: String,

    #[builder(default)]
    pub status: TaskStatus,
    #[builder(default = 0)]
    pub progress: i32,

    #[builder(default = Value::Object(Default::default()))]
    pub params: Value,
    #[builder(default, setter(strip_option))]
    pub result: Option<Value>,
    #[builder(default, setter(strip_option))]
    pub error: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Wall time between start and completion; absent until both are recorded.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration()
            .map(|d| d.num_milliseconds() as f64 / 1000.0)
    }

    pub fn is_owned_by(&self, owner_id: Option<&str>) -> bool {
        match owner_id {
            Some(owner) => self.owner_id.as_deref() == Some(owner),
            None => true,
        }
    }
}

// ============================================================================
// Transitions
// ============================================================================

/// A conditional status change.
///
/// Stores apply it only while the task is in one of `from`, in a single
/// atomic step, and report whether it took effect. This is the only way the
/// supervisor, the manager and the recycler change a task's status.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTransition {
    pub from: &'static [TaskStatus],
    pub to: TaskStatus,
    pub progress: Option<i32>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl TaskTransition {
    pub fn start() -> Self {
        Self::new(&[TaskStatus::Pending], TaskStatus::Running).with_progress(0)
    }

    pub fn complete(result: Value) -> Self {
        let mut transition =
            Self::new(&[TaskStatus::Running], TaskStatus::Completed).with_progress(100);
        transition.result = Some(result);
        transition
    }

    pub fn fail(error: impl Into<String>) -> Self {
        let mut transition = Self::new(&[TaskStatus::Running], TaskStatus::Failed);
        transition.error = Some(error.into());
        transition
    }

    pub fn cancel() -> Self {
        Self::new(
            &[TaskStatus::Pending, TaskStatus::Running],
            TaskStatus::Cancelled,
        )
    }

    fn new(from: &'static [TaskStatus], to: TaskStatus) -> Self {
        debug_assert!(from.iter().all(|status| status.can_transition_to(to)));
        Self {
            from,
            to,
            progress: None,
            result: None,
            error: None,
            at: Utc::now(),
        }
    }

    fn with_progress(mut self, progress: i32) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn applies_to(&self, status: TaskStatus) -> bool {
        self.from.contains(&status)
    }

    /// Status strings for the store's guard clause.
    pub fn from_names(&self) -> Vec<String> {
        self.from.iter().map(|s| s.as_str().to_string()).collect()
    }

    /// Apply to an in-memory record. Callers check [`applies_to`](Self::applies_to) first.
    pub fn apply(&self, task: &mut Task) {
        task.status = self.to;
        if let Some(progress) = self.progress {
            task.progress = progress;
        }
        if let Some(result) = &self.result {
            task.result = Some(result.clone());
        }
        if let Some(error) = &self.error {
            task.error = Some(error.clone());
        }
        if self.to == TaskStatus::Running && task.started_at.is_none() {
            task.started_at = Some(self.at);
        }
        if self.to.is_terminal() && task.completed_at.is_none() {
            task.completed_at = Some(self.at);
        }
    }
}
