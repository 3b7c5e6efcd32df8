//! Persistence boundary for task records.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Task, TaskStatus, TaskTransition};

/// Listing filter. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub crawler_type: Option<String>,
    pub owner_id: Option<String>,
    pub offset: i64,
    pub limit: i64,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |status| task.status == status)
            && self
                .crawler_type
                .as_deref()
                .map_or(true, |crawler_type| task.crawler_type == crawler_type)
            && self
                .owner_id
                .as_deref()
                .map_or(true, |owner| task.owner_id.as_deref() == Some(owner))
    }
}

/// Task storage.
///
/// Every status change goes through [`transition`](TaskStore::transition),
/// which must be atomic per task: the guard check and the write happen as
/// one step, so at most one of several racing writers wins.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: &Task) -> Result<Task>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>>;

    /// Newest first.
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Ignores `offset` and `limit`.
    async fn count(&self, filter: &TaskFilter) -> Result<i64>;

    /// Deletes the task if its status is one of `only_if`.
    async fn delete(&self, id: Uuid, only_if: &[TaskStatus]) -> Result<bool>;

    /// Applies `transition` if the task is currently in one of its `from`
    /// states. Returns the updated task, or `None` when the guard did not match.
    async fn transition(&self, id: Uuid, transition: &TaskTransition) -> Result<Option<Task>>;

    /// Raises progress of a running task. Returns `false` if the task is no
    /// longer running or `progress` is not above the stored value.
    async fn update_progress(&self, id: Uuid, progress: i32) -> Result<bool>;

    /// Running tasks whose start (or creation, if never started) is older than `cutoff`.
    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>>;

    async fn ping(&self) -> Result<()>;
}
