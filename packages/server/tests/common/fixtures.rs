//! Test fixtures and response helpers.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use chrono::{DateTime, Utc};
use crawl_core::kernel::tasks::{Task, TaskEvent, TaskStatus, TaskStore};
use crawl_core::kernel::Subscription;
use serde_json::Value;

/// Insert a pending task directly, bypassing submission and the supervisor.
pub async fn insert_pending(store: &dyn TaskStore, crawler_type: &str, params: Value) -> Task {
    let task = Task::builder()
        .crawler_type(crawler_type)
        .params(params)
        .build();
    store.create(&task).await.expect("create pending task")
}

/// Insert a task already `running` since `started_at`.
pub async fn insert_running(
    store: &dyn TaskStore,
    crawler_type: &str,
    started_at: DateTime<Utc>,
) -> Task {
    let task = Task::builder()
        .crawler_type(crawler_type)
        .status(TaskStatus::Running)
        .progress(40)
        .created_at(started_at)
        .started_at(started_at)
        .build();
    store.create(&task).await.expect("create running task")
}

/// Receive events until a terminal one arrives; panics after 5s.
pub async fn collect_until_terminal(subscription: &mut Subscription) -> Vec<TaskEvent> {
    let mut events = Vec::new();
    let collect = async {
        while let Some(event) = subscription.recv().await {
            let done = event.status.is_terminal();
            events.push(event);
            if done {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("no terminal event within 5s");
    events
}

pub fn json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("valid request")
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("JSON body")
}
