//! In-process task store for development without a database, and for tests.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Task, TaskFilter, TaskStatus, TaskStore, TaskTransition};

/// Every mutation runs under the write lock, which gives each conditional
/// update the same all-or-nothing behaviour as a single SQL statement.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<Uuid, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &Task) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            bail!("task {} already exists", task.id);
        }
        tasks.insert(task.id, task.clone());
        Ok(task.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut matching: Vec<Task> = tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, filter: &TaskFilter) -> Result<i64> {
        let tasks = self.tasks.read().await;
        Ok(tasks.values().filter(|t| filter.matches(t)).count() as i64)
    }

    async fn delete(&self, id: Uuid, only_if: &[TaskStatus]) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        match tasks.get(&id) {
            Some(task) if only_if.contains(&task.status) => {
                tasks.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition(&self, id: Uuid, transition: &TaskTransition) -> Result<Option<Task>> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&id) {
            Some(task) if transition.applies_to(task.status) => {
                transition.apply(task);
                Ok(Some(task.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_progress(&self, id: Uuid, progress: i32) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Running && task.progress < progress => {
                task.progress = progress;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut stale: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .filter(|t| t.started_at.unwrap_or(t.created_at) < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|t| t.started_at.unwrap_or(t.created_at));
        Ok(stale)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
