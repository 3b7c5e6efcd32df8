//! Submission, query and cancellation of crawl tasks.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::{
    RegistryError, RunningTasks, SharedCrawlerRegistry, Task, TaskEvent, TaskFilter, TaskStatus,
    TaskStore, TaskSupervisor, TaskTransition,
};
use crate::kernel::stream_hub::StreamHub;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("cannot {action} task {task_id}: it is {status}")]
    InvalidTransition {
        task_id: Uuid,
        status: TaskStatus,
        action: &'static str,
    },

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Listing request; `page` is 1-based.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub page: u32,
    pub page_size: u32,
    pub status: Option<TaskStatus>,
    pub crawler_type: Option<String>,
    pub owner_id: Option<String>,
}

impl TaskQuery {
    fn normalized(&self) -> (u32, u32) {
        let page = self.page.max(1);
        let page_size = match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            size => size.min(MAX_PAGE_SIZE),
        };
        (page, page_size)
    }
}

/// Task counts by status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskStats {
    pub total: i64,
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    /// `completed / total`, 0 when there are no tasks.
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    pub total: i64,
    pub tasks: Vec<Task>,
    pub page: u32,
    pub page_size: u32,
}

/// Entry point for everything outside the kernel that touches tasks.
///
/// When a caller passes an owner id, tasks of other owners behave as if
/// they did not exist.
#[derive(Clone)]
pub struct TaskManager {
    store: Arc<dyn TaskStore>,
    registry: SharedCrawlerRegistry,
    supervisor: TaskSupervisor,
    hub: StreamHub,
    running: RunningTasks,
}

impl TaskManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: SharedCrawlerRegistry,
        supervisor: TaskSupervisor,
        hub: StreamHub,
        running: RunningTasks,
    ) -> Self {
        Self {
            store,
            registry,
            supervisor,
            hub,
            running,
        }
    }

    /// Validate, persist as pending, and hand off to the supervisor.
    ///
    /// Returns as soon as the pending record exists; execution is asynchronous.
    pub async fn submit(
        &self,
        crawler_type: &str,
        params: Value,
        owner_id: Option<String>,
    ) -> Result<Task, TaskError> {
        self.registry.validate(crawler_type, &params)?;

        let task = Task::builder()
            .crawler_type(crawler_type)
            .params(params)
            .owner_id(owner_id)
            .build();
        let task = self.store.create(&task).await?;

        info!(task_id = %task.id, crawler_type, "task submitted");
        self.supervisor.spawn(task.id);
        Ok(task)
    }

    pub async fn get(&self, task_id: Uuid, owner_id: Option<&str>) -> Result<Task, TaskError> {
        match self.store.find_by_id(task_id).await? {
            Some(task) if task.is_owned_by(owner_id) => Ok(task),
            _ => Err(TaskError::NotFound(task_id)),
        }
    }

    pub async fn list(&self, query: &TaskQuery) -> Result<TaskPage, TaskError> {
        let (page, page_size) = query.normalized();
        let filter = TaskFilter {
            status: query.status,
            crawler_type: query.crawler_type.clone(),
            owner_id: query.owner_id.clone(),
            offset: i64::from(page - 1) * i64::from(page_size),
            limit: i64::from(page_size),
        };

        let total = self.store.count(&filter).await?;
        let tasks = self.store.list(&filter).await?;
        Ok(TaskPage {
            total,
            tasks,
            page,
            page_size,
        })
    }

    /// Counts per status, scoped to `owner_id` when given.
    pub async fn stats(&self, owner_id: Option<&str>) -> Result<TaskStats, TaskError> {
        let count = |status: Option<TaskStatus>| {
            let filter = TaskFilter {
                status,
                owner_id: owner_id.map(str::to_string),
                ..TaskFilter::default()
            };
            async move { self.store.count(&filter).await }
        };

        let total = count(None).await?;
        let completed = count(Some(TaskStatus::Completed)).await?;
        Ok(TaskStats {
            total,
            pending: count(Some(TaskStatus::Pending)).await?,
            running: count(Some(TaskStatus::Running)).await?,
            completed,
            failed: count(Some(TaskStatus::Failed)).await?,
            cancelled: count(Some(TaskStatus::Cancelled)).await?,
            success_rate: if total > 0 {
                completed as f64 / total as f64
            } else {
                0.0
            },
        })
    }

    /// Cancel a pending or running task.
    ///
    /// A running strategy is signalled and stops at its next progress report.
    pub async fn cancel(&self, task_id: Uuid, owner_id: Option<&str>) -> Result<Task, TaskError> {
        self.get(task_id, owner_id).await?;

        match self.store.transition(task_id, &TaskTransition::cancel()).await? {
            Some(cancelled) => {
                let signalled = self.running.cancel(task_id).await;
                info!(task_id = %task_id, signalled, "task cancelled");
                self.hub
                    .publish(task_id, TaskEvent::from_task(&cancelled, "Task cancelled"))
                    .await;
                Ok(cancelled)
            }
            None => Err(self.conflict(task_id, "cancel").await),
        }
    }

    /// Delete a task that is not running.
    pub async fn delete(&self, task_id: Uuid, owner_id: Option<&str>) -> Result<(), TaskError> {
        let task = self.get(task_id, owner_id).await?;
        if task.status == TaskStatus::Running {
            return Err(TaskError::InvalidTransition {
                task_id,
                status: task.status,
                action: "delete",
            });
        }

        let deletable = [
            TaskStatus::Pending,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ];
        if self.store.delete(task_id, &deletable).await? {
            info!(task_id = %task_id, "task deleted");
            Ok(())
        } else {
            Err(self.conflict(task_id, "delete").await)
        }
    }

    async fn conflict(&self, task_id: Uuid, action: &'static str) -> TaskError {
        match self.store.find_by_id(task_id).await {
            Ok(Some(task)) => TaskError::InvalidTransition {
                task_id,
                status: task.status,
                action,
            },
            Ok(None) => TaskError::NotFound(task_id),
            Err(e) => TaskError::Storage(e),
        }
    }
}
