//! In-process pub/sub hub for task progress.
//!
//! Observers subscribe per task id and receive [`TaskEvent`]s on a bounded
//! channel. Delivery is best effort and at most once:
//!
//! - a closed subscriber is removed during the publish that finds it closed
//! - a full subscriber is disconnected; it drains what it already has, then
//!   its receiver ends
//! - nothing is buffered for tasks without subscribers (no replay)
//!
//! # Usage
//!
//! Producers (the task supervisor):
//!   hub.publish(task_id, TaskEvent::progress(task_id, 40, "page 2 of 5")).await;
//!
//! Consumers (WebSocket connections):
//!   let mut subscription = hub.subscribe(task_id).await;
//!   while let Some(event) = subscription.recv().await { ... }
//!   hub.unsubscribe(task_id, subscription.id()).await;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::kernel::tasks::TaskEvent;

#[derive(Clone)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<TaskEvent>,
}

/// One observer's end of a task's event stream.
pub struct Subscription {
    id: u64,
    task_id: Uuid,
    receiver: mpsc::Receiver<TaskEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Next event, or `None` once the hub has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TaskEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Task-keyed fan-out hub. Cloneable; clones share subscribers.
#[derive(Clone)]
pub struct StreamHub {
    subscribers: Arc<RwLock<HashMap<Uuid, Vec<Subscriber>>>>,
    next_id: Arc<AtomicU64>,
    capacity: usize,
}

impl StreamHub {
    /// Hub with the default per-subscriber buffer (256 events).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            capacity: capacity.max(1),
        }
    }

    pub async fn subscribe(&self, task_id: Uuid) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .write()
            .await
            .entry(task_id)
            .or_default()
            .push(Subscriber { id, tx });

        debug!(task_id = %task_id, subscriber_id = id, "subscriber added");
        Subscription {
            id,
            task_id,
            receiver,
        }
    }

    /// Returns `false` if the subscriber was already gone.
    pub async fn unsubscribe(&self, task_id: Uuid, subscription_id: u64) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let Some(list) = subscribers.get_mut(&task_id) else {
            return false;
        };

        let before = list.len();
        list.retain(|s| s.id != subscription_id);
        let removed = list.len() < before;
        if list.is_empty() {
            subscribers.remove(&task_id);
        }
        removed
    }

    pub async fn subscriber_count(&self, task_id: Uuid) -> usize {
        self.subscribers
            .read()
            .await
            .get(&task_id)
            .map_or(0, Vec::len)
    }

    /// Number of task ids with at least one subscriber.
    pub async fn topic_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Deliver `event` to every current subscriber of `task_id`.
    ///
    /// Works on a snapshot of the subscriber list, so concurrent
    /// subscribe/unsubscribe never block on delivery. Returns how many
    /// subscribers accepted the event.
    pub async fn publish(&self, task_id: Uuid, event: TaskEvent) -> usize {
        let targets: Vec<Subscriber> = match self.subscribers.read().await.get(&task_id) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut gone = Vec::new();
        for subscriber in &targets {
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    // Missing an event could mean missing the terminal one.
                    warn!(
                        task_id = %task_id,
                        subscriber_id = subscriber.id,
                        "subscriber buffer full, disconnecting"
                    );
                    gone.push(subscriber.id);
                }
                Err(TrySendError::Closed(_)) => gone.push(subscriber.id),
            }
        }

        if !gone.is_empty() {
            self.remove_subscribers(task_id, &gone).await;
        }
        delivered
    }

    async fn remove_subscribers(&self, task_id: Uuid, ids: &[u64]) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(list) = subscribers.get_mut(&task_id) {
            list.retain(|s| !ids.contains(&s.id));
            if list.is_empty() {
                subscribers.remove(&task_id);
            }
        }
        debug!(task_id = %task_id, removed = ids.len(), "removed subscribers");
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tasks::TaskStatus;

    fn event(task_id: Uuid, progress: i32) -> TaskEvent {
        TaskEvent::progress(task_id, progress, format!("at {progress}"))
    }

    #[tokio::test]
    async fn test_publish_subscribe_roundtrip() {
        let hub = StreamHub::new();
        let task_id = Uuid::new_v4();
        let mut subscription = hub.subscribe(task_id).await;

        assert_eq!(hub.publish(task_id, event(task_id, 10)).await, 1);

        let received = subscription.recv().await.unwrap();
        assert_eq!(received.progress, 10);
        assert_eq!(received.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_publish_no_subscribers_is_noop() {
        let hub = StreamHub::new();
        let task_id = Uuid::new_v4();

        assert_eq!(hub.publish(task_id, event(task_id, 50)).await, 0);
        assert_eq!(hub.topic_count().await, 0);

        // Nothing is replayed to a late subscriber.
        let mut late = hub.subscribe(task_id).await;
        assert!(late.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_fan_out_survives_broken_subscriber() {
        let hub = StreamHub::new();
        let task_id = Uuid::new_v4();

        let mut healthy: Vec<Subscription> = Vec::new();
        for _ in 0..4 {
            healthy.push(hub.subscribe(task_id).await);
        }
        let broken = hub.subscribe(task_id).await;
        drop(broken);
        assert_eq!(hub.subscriber_count(task_id).await, 5);

        let delivered = hub.publish(task_id, event(task_id, 20)).await;

        assert_eq!(delivered, 4);
        assert_eq!(hub.subscriber_count(task_id).await, 4);
        for subscription in &mut healthy {
            assert_eq!(subscription.recv().await.unwrap().progress, 20);
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let hub = StreamHub::new();
        let task_id = Uuid::new_v4();
        let mut subscription = hub.subscribe(task_id).await;

        for progress in [10, 30, 60, 90] {
            hub.publish(task_id, event(task_id, progress)).await;
        }

        let mut seen = Vec::new();
        while let Some(event) = subscription.try_recv() {
            seen.push(event.progress);
        }
        assert_eq!(seen, vec![10, 30, 60, 90]);
    }

    #[tokio::test]
    async fn test_full_subscriber_is_disconnected() {
        let hub = StreamHub::with_capacity(1);
        let task_id = Uuid::new_v4();
        let mut slow = hub.subscribe(task_id).await;
        let mut fast = hub.subscribe(task_id).await;

        assert_eq!(hub.publish(task_id, event(task_id, 10)).await, 2);
        assert_eq!(fast.recv().await.unwrap().progress, 10);

        assert_eq!(hub.publish(task_id, event(task_id, 20)).await, 1);
        assert_eq!(hub.subscriber_count(task_id).await, 1);
        assert_eq!(fast.recv().await.unwrap().progress, 20);

        // The slow one drains what it had, then its stream ends.
        assert_eq!(slow.recv().await.unwrap().progress, 10);
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_prunes_empty_topics() {
        let hub = StreamHub::new();
        let task_id = Uuid::new_v4();
        let subscription = hub.subscribe(task_id).await;

        assert!(hub.unsubscribe(task_id, subscription.id()).await);
        assert!(!hub.unsubscribe(task_id, subscription.id()).await);
        assert_eq!(hub.topic_count().await, 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let hub = StreamHub::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut sub_a = hub.subscribe(a).await;
        let mut sub_b = hub.subscribe(b).await;

        hub.publish(a, event(a, 10)).await;

        assert_eq!(sub_a.recv().await.unwrap().task_id, a);
        assert!(sub_b.try_recv().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribe_during_publish() {
        let hub = StreamHub::new();
        let task_id = Uuid::new_v4();
        let mut first = hub.subscribe(task_id).await;

        let publisher = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for progress in 1..=100 {
                    hub.publish(task_id, event(task_id, progress)).await;
                }
            })
        };
        let churn = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let subscription = hub.subscribe(task_id).await;
                    hub.unsubscribe(task_id, subscription.id()).await;
                }
            })
        };
        publisher.await.unwrap();
        churn.await.unwrap();

        let mut count = 0;
        while first.try_recv().is_some() {
            count += 1;
        }
        assert_eq!(count, 100);
        assert_eq!(hub.subscriber_count(task_id).await, 1);
    }
}
