//! Task execution supervisor.
//!
//! Drives one task from `pending` to a terminal status:
//!
//! ```text
//! execute(task_id)
//!     │
//!     ├─► wait for a concurrency permit (task stays pending)
//!     ├─► pending → running            (conditional; skipped if cancelled first)
//!     ├─► publish {running, 0}
//!     ├─► strategy.run(emitter)        (panics caught)
//!     │       └─► emit: clamp → persist → publish
//!     └─► running → completed | failed (conditional; publish only if it applied)
//! ```
//!
//! All status writes are guarded transitions, so a cancellation or a recycler
//! sweep that got there first is never overwritten.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    CrawlerError, ProgressEmitter, ProgressSink, RunningTasks, SharedCrawlerRegistry, Task,
    TaskEvent, TaskStore, TaskTransition,
};
use crate::kernel::stream_hub::StreamHub;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Tasks executing at once; the rest wait in `pending`.
    pub max_concurrent: usize,
    /// Attempts at writing the terminal status before giving up to the recycler.
    pub finalize_attempts: u32,
    pub finalize_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            finalize_attempts: 3,
            finalize_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
pub struct TaskSupervisor {
    store: Arc<dyn TaskStore>,
    hub: StreamHub,
    registry: SharedCrawlerRegistry,
    running: RunningTasks,
    permits: Arc<Semaphore>,
    config: SupervisorConfig,
}

impl TaskSupervisor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        hub: StreamHub,
        registry: SharedCrawlerRegistry,
        running: RunningTasks,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            store,
            hub,
            registry,
            running,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            config,
        }
    }

    /// Run `execute` in the background.
    pub fn spawn(&self, task_id: Uuid) -> JoinHandle<Option<Task>> {
        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.execute(task_id).await })
    }

    /// Permits currently free.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Execute a pending task to completion.
    ///
    /// Returns the settled task if this call wrote its terminal status, or
    /// `None` if the task was not pending, or if another writer settled it first.
    pub async fn execute(&self, task_id: Uuid) -> Option<Task> {
        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(task_id = %task_id, "supervisor is shut down, task left pending");
                return None;
            }
        };

        // Registered before the start transition, so a cancel that sees
        // `running` always finds the token.
        let cancel = self.running.insert(task_id).await;
        let task = match self.persist(task_id, &TaskTransition::start()).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                self.running.remove(task_id).await;
                debug!(task_id = %task_id, "task is no longer pending, skipping");
                return None;
            }
            Err(e) => {
                self.running.remove(task_id).await;
                error!(task_id = %task_id, error = %e, "could not start task, it stays pending");
                return None;
            }
        };

        info!(task_id = %task_id, crawler_type = %task.crawler_type, "task started");
        if !cancel.is_cancelled() {
            self.hub
                .publish(task_id, TaskEvent::from_task(&task, "Task started"))
                .await;
        }

        let outcome = self.run_strategy(&task, cancel).await;
        let settled = self.finalize(&task, outcome).await;

        self.running.remove(task_id).await;
        settled
    }

    async fn run_strategy(
        &self,
        task: &Task,
        cancel: CancellationToken,
    ) -> Result<Value, CrawlerError> {
        let mut strategy = self
            .registry
            .instantiate(&task.crawler_type, &task.params)
            .map_err(|e| CrawlerError::Other(e.to_string()))?;

        let sink = Arc::new(SupervisedProgress {
            task_id: task.id,
            store: Arc::clone(&self.store),
            hub: self.hub.clone(),
            cancel: cancel.clone(),
            last: Mutex::new(task.progress),
        });
        let emitter = ProgressEmitter::new(sink, cancel);

        match AssertUnwindSafe(strategy.run(emitter)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(CrawlerError::Other(format!(
                "strategy panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    async fn finalize(&self, task: &Task, outcome: Result<Value, CrawlerError>) -> Option<Task> {
        let (transition, message) = match outcome {
            Ok(result) => {
                let result = if result.is_null() { json!({}) } else { result };
                (TaskTransition::complete(result), "Task completed")
            }
            Err(e) => {
                let mut reason = e.to_string();
                if reason.trim().is_empty() {
                    reason = format!("{} crawler failed without a message", task.crawler_type);
                }
                warn!(task_id = %task.id, crawler_type = %task.crawler_type, error = %reason, "task failed");
                (TaskTransition::fail(reason), "Task failed")
            }
        };

        let settled = match self.persist(task.id, &transition).await {
            Ok(settled) => settled,
            Err(e) => {
                error!(
                    task_id = %task.id,
                    error = %e,
                    "terminal status not persisted, left for the recycler"
                );
                return None;
            }
        };
        match &settled {
            Some(settled) => {
                info!(
                    task_id = %task.id,
                    status = %settled.status,
                    duration_secs = settled.duration_secs().unwrap_or_default(),
                    "task settled"
                );
                self.hub
                    .publish(task.id, TaskEvent::from_task(settled, message))
                    .await;
            }
            None => {
                debug!(task_id = %task.id, "task was settled by another writer");
            }
        }
        settled
    }

    /// Apply a transition, retrying storage errors. `Ok(None)` if the guard
    /// did not match; the last storage error once attempts run out.
    async fn persist(
        &self,
        task_id: Uuid,
        transition: &TaskTransition,
    ) -> anyhow::Result<Option<Task>> {
        let attempts = self.config.finalize_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.transition(task_id, transition).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!(
                        task_id = %task_id,
                        to = %transition.to,
                        attempt,
                        error = %e,
                        "failed to persist task transition, retrying"
                    );
                    tokio::time::sleep(self.config.finalize_backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Progress sink wired to one task's record and its observers.
///
/// The lock is held across persist and publish, so each event is one unit
/// and observers see events in emission order.
struct SupervisedProgress {
    task_id: Uuid,
    store: Arc<dyn TaskStore>,
    hub: StreamHub,
    cancel: CancellationToken,
    last: Mutex<i32>,
}

#[async_trait]
impl ProgressSink for SupervisedProgress {
    async fn emit(&self, percent: i32, message: String) -> Result<(), CrawlerError> {
        let mut last = self.last.lock().await;
        // A cancel or recycle may have landed while waiting for the lock.
        if self.cancel.is_cancelled() {
            return Err(CrawlerError::Cancelled);
        }
        let progress = percent.clamp(*last, 100);

        if progress > *last {
            match self.store.update_progress(self.task_id, progress).await {
                Ok(true) => *last = progress,
                Ok(false) => {
                    debug!(task_id = %self.task_id, "task no longer running, stopping strategy");
                    return Err(CrawlerError::Cancelled);
                }
                Err(e) => {
                    error!(task_id = %self.task_id, progress, error = %e, "failed to persist progress");
                    *last = progress;
                }
            }
        }

        debug!(task_id = %self.task_id, progress, message = %message, "task progress");
        self.hub
            .publish(self.task_id, TaskEvent::progress(self.task_id, progress, message))
            .await;
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
