//! Stale task recycler.
//!
//! Periodically force-fails tasks that have been `running` longer than the
//! configured timeout: crashed workers, lost in-process state, anything the
//! supervisor never got to finalize.
//!
//! A sweep is two phases. [`StaleTaskRecycler::select_stale`] reads
//! candidates, and [`StaleTaskRecycler::recycle`] moves each one with a
//! guarded `running → failed` transition. A task that settles between the
//! two phases keeps its own outcome, and repeated sweeps change nothing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{RunningTasks, Task, TaskEvent, TaskStore, TaskTransition};
use crate::kernel::stream_hub::StreamHub;

/// Failure reason written to recycled tasks.
#[derive(Debug, Error)]
#[error("task exceeded the {}s running timeout and was recycled", .timeout.as_secs())]
pub struct RecycleTimeout {
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RecyclerConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for RecyclerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Clone)]
pub struct StaleTaskRecycler {
    store: Arc<dyn TaskStore>,
    hub: StreamHub,
    running: RunningTasks,
    config: RecyclerConfig,
}

impl StaleTaskRecycler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        hub: StreamHub,
        running: RunningTasks,
        config: RecyclerConfig,
    ) -> Self {
        Self {
            store,
            hub,
            running,
            config,
        }
    }

    pub fn config(&self) -> &RecyclerConfig {
        &self.config
    }

    /// Running tasks started (or, if never started, created) before `now - timeout`.
    pub async fn select_stale(&self) -> Result<Vec<Task>> {
        let timeout = chrono::Duration::from_std(self.config.timeout)
            .context("recycle timeout out of range")?;
        self.store.find_stale(Utc::now() - timeout).await
    }

    /// Fail each candidate that is still running. Returns the tasks this call
    /// actually recycled. Per-task storage errors are logged and left for the
    /// next sweep.
    pub async fn recycle(&self, candidates: &[Task]) -> Vec<Task> {
        let reason = RecycleTimeout {
            timeout: self.config.timeout,
        }
        .to_string();

        let mut recycled = Vec::new();
        for candidate in candidates {
            match self
                .store
                .transition(candidate.id, &TaskTransition::fail(reason.clone()))
                .await
            {
                Ok(Some(task)) => {
                    let signalled = self.running.cancel(task.id).await;
                    warn!(
                        task_id = %task.id,
                        crawler_type = %task.crawler_type,
                        signalled,
                        "recycled stale task"
                    );
                    self.hub
                        .publish(task.id, TaskEvent::from_task(&task, "Task timed out"))
                        .await;
                    recycled.push(task);
                }
                Ok(None) => {
                    debug!(task_id = %candidate.id, "stale candidate settled before recycling");
                }
                Err(e) => {
                    error!(task_id = %candidate.id, error = %e, "failed to recycle task");
                }
            }
        }
        recycled
    }

    /// One full pass: select, then recycle.
    pub async fn sweep(&self) -> Result<Vec<Task>> {
        let candidates = self.select_stale().await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.recycle(&candidates).await)
    }

    /// Sweep every `interval` until `shutdown` fires. Failed sweeps are logged
    /// and retried on the next tick.
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.config.interval.as_secs(),
                timeout_secs = self.config.timeout.as_secs(),
                "stale task recycler started"
            );
            // interval() panics on a zero period
            let period = self.config.interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => match self.sweep().await {
                        Ok(recycled) if recycled.is_empty() => {}
                        Ok(recycled) => info!(count = recycled.len(), "recycled stale tasks"),
                        Err(e) => error!(error = %e, "recycler sweep failed"),
                    },
                }
            }
            info!("stale task recycler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tasks::{InMemoryTaskStore, TaskStatus};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn recycler(store: Arc<dyn TaskStore>) -> StaleTaskRecycler {
        StaleTaskRecycler::new(
            store,
            StreamHub::new(),
            RunningTasks::new(),
            RecyclerConfig {
                interval: Duration::from_millis(10),
                timeout: Duration::from_secs(60),
            },
        )
    }

    fn running_since(started: DateTime<Utc>) -> Task {
        Task::builder()
            .crawler_type("jobs")
            .status(TaskStatus::Running)
            .created_at(started)
            .started_at(started)
            .build()
    }

    #[tokio::test]
    async fn test_recycle_timeout_message() {
        let reason = RecycleTimeout {
            timeout: Duration::from_secs(1800),
        };
        assert_eq!(
            reason.to_string(),
            "task exceeded the 1800s running timeout and was recycled"
        );
    }

    #[tokio::test]
    async fn test_sweep_fails_only_old_running_tasks() {
        let store = Arc::new(InMemoryTaskStore::new());
        let old = store
            .create(&running_since(Utc::now() - ChronoDuration::minutes(5)))
            .await
            .unwrap();
        let fresh = store.create(&running_since(Utc::now())).await.unwrap();

        let recycled = recycler(store.clone()).sweep().await.unwrap();

        assert_eq!(recycled.len(), 1);
        assert_eq!(recycled[0].id, old.id);
        let old = store.find_by_id(old.id).await.unwrap().unwrap();
        assert_eq!(old.status, TaskStatus::Failed);
        assert!(old.error.unwrap().contains("running timeout"));
        assert!(old.completed_at.is_some());
        let fresh = store.find_by_id(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, TaskStatus::Running);
    }

    /// Store whose stale query always errors; everything else is unreachable.
    struct BrokenStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskStore for BrokenStore {
        async fn create(&self, _: &Task) -> Result<Task> {
            unreachable!()
        }
        async fn find_by_id(&self, _: Uuid) -> Result<Option<Task>> {
            unreachable!()
        }
        async fn list(&self, _: &crate::kernel::tasks::TaskFilter) -> Result<Vec<Task>> {
            unreachable!()
        }
        async fn count(&self, _: &crate::kernel::tasks::TaskFilter) -> Result<i64> {
            unreachable!()
        }
        async fn delete(&self, _: Uuid, _: &[TaskStatus]) -> Result<bool> {
            unreachable!()
        }
        async fn transition(&self, _: Uuid, _: &TaskTransition) -> Result<Option<Task>> {
            unreachable!()
        }
        async fn update_progress(&self, _: Uuid, _: i32) -> Result<bool> {
            unreachable!()
        }
        async fn find_stale(&self, _: DateTime<Utc>) -> Result<Vec<Task>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("connection refused")
        }
        async fn ping(&self) -> Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_loop_survives_sweep_errors_and_stops_on_shutdown() {
        let store = Arc::new(BrokenStore {
            calls: AtomicUsize::new(0),
        });
        let shutdown = CancellationToken::new();
        let handle = recycler(store.clone()).start(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(store.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_zero_interval_still_sweeps() {
        let store = Arc::new(InMemoryTaskStore::new());
        let stale = store
            .create(&running_since(Utc::now() - ChronoDuration::hours(2)))
            .await
            .unwrap();
        let recycler = StaleTaskRecycler::new(
            store.clone(),
            StreamHub::new(),
            RunningTasks::new(),
            RecyclerConfig {
                interval: Duration::ZERO,
                timeout: Duration::from_secs(60),
            },
        );

        let shutdown = CancellationToken::new();
        let handle = recycler.start(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let stale = store.find_by_id(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, TaskStatus::Failed);
    }
}
