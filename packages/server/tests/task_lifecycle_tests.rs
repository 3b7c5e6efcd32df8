//! End-to-end task lifecycle through the manager, supervisor and hub.

mod common;

use common::*;
use crawl_core::kernel::tasks::{TaskError, TaskQuery, TaskStatus, TaskStore};
use serde_json::json;
use test_context::test_context;

#[test_context(TestHarness)]
#[tokio::test]
async fn test_submitted_task_completes_with_result(ctx: &mut TestHarness) {
    let task = ctx
        .deps
        .manager
        .submit("echo", json!({"a": 1}), None)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    let settled = ctx.wait_for_terminal(task.id).await;

    assert_eq!(settled.status, TaskStatus::Completed);
    assert_eq!(settled.progress, 100);
    assert_eq!(settled.result, Some(json!({"echo": {"a": 1}})));
    assert!(settled.error.is_none());
    assert!(settled.started_at.is_some());
    assert!(settled.completed_at >= settled.started_at);
}

#[tokio::test]
async fn test_task_waits_in_pending_while_slots_are_busy() {
    let ctx = TestHarness::with_concurrency(1);

    let blocker = ctx.deps.manager.submit("gated", json!({}), None).await.unwrap();
    ctx.gate.wait_until_entered().await;

    let queued = ctx
        .deps
        .manager
        .submit("echo", json!({"a": 1}), None)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let waiting = ctx.task(queued.id).await;
    assert_eq!(waiting.status, TaskStatus::Pending);
    assert_eq!(waiting.progress, 0);

    ctx.gate.release();
    assert_eq!(ctx.wait_for_terminal(blocker.id).await.status, TaskStatus::Completed);

    let done = ctx.wait_for_terminal(queued.id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result, Some(json!({"echo": {"a": 1}})));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_observer_sees_running_then_failed(ctx: &mut TestHarness) {
    let task = insert_pending(ctx.store.as_ref(), "failing", json!({})).await;
    let mut subscription = ctx.deps.hub.subscribe(task.id).await;

    let settled = ctx.deps.supervisor.execute(task.id).await.unwrap();
    let events = collect_until_terminal(&mut subscription).await;

    assert_eq!(settled.status, TaskStatus::Failed);
    assert!(settled.error.as_deref().unwrap().contains("nothing to see"));

    let statuses: Vec<TaskStatus> = events.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Running, TaskStatus::Running, TaskStatus::Failed]
    );
    assert_eq!(events[1].progress, 20);
    assert!(events[2].error.as_deref().unwrap().contains("nothing to see"));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_observed_progress_never_decreases(ctx: &mut TestHarness) {
    let task = insert_pending(
        ctx.store.as_ref(),
        "scripted",
        json!({"steps": [10, 50, 30, 150, 70]}),
    )
    .await;
    let mut subscription = ctx.deps.hub.subscribe(task.id).await;

    ctx.deps.supervisor.execute(task.id).await.unwrap();
    let events = collect_until_terminal(&mut subscription).await;

    let progress: Vec<i32> = events.iter().map(|e| e.progress).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(progress.last(), Some(&100));
    assert_eq!(events.last().unwrap().status, TaskStatus::Completed);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_cancel_pending_task_never_runs(ctx: &mut TestHarness) {
    let task = insert_pending(ctx.store.as_ref(), "echo", json!({})).await;

    let cancelled = ctx.deps.manager.cancel(task.id, None).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    assert!(ctx.deps.supervisor.execute(task.id).await.is_none());
    assert_eq!(ctx.task(task.id).await.status, TaskStatus::Cancelled);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_cancel_running_task_stops_strategy(ctx: &mut TestHarness) {
    let task = ctx.deps.manager.submit("gated", json!({}), None).await.unwrap();
    ctx.gate.wait_until_entered().await;
    let mut subscription = ctx.deps.hub.subscribe(task.id).await;

    let cancelled = ctx.deps.manager.cancel(task.id, None).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    let events = collect_until_terminal(&mut subscription).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, TaskStatus::Cancelled);

    // The strategy's next checkpoint stops it; nothing overwrites the outcome.
    ctx.gate.release();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let task = ctx.task(task.id).await;
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.result.is_none());
    assert!(!ctx.deps.running.contains(task.id).await);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_cancel_terminal_task_is_a_conflict(ctx: &mut TestHarness) {
    let task = ctx.deps.manager.submit("echo", json!({}), None).await.unwrap();
    ctx.wait_for_terminal(task.id).await;

    let err = ctx.deps.manager.cancel(task.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        TaskError::InvalidTransition {
            status: TaskStatus::Completed,
            ..
        }
    ));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_unknown_crawler_type_creates_nothing(ctx: &mut TestHarness) {
    let err = ctx
        .deps
        .manager
        .submit("does_not_exist", json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::Registry(_)));

    let err = ctx
        .deps
        .manager
        .submit("scripted", json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::Registry(_)));

    let page = ctx.deps.manager.list(&TaskQuery::default()).await.unwrap();
    assert_eq!(page.total, 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_owner_isolation(ctx: &mut TestHarness) {
    let alice = ctx
        .deps
        .manager
        .submit("echo", json!({}), Some("alice".to_string()))
        .await
        .unwrap();
    ctx.deps
        .manager
        .submit("echo", json!({}), Some("bob".to_string()))
        .await
        .unwrap();
    ctx.wait_for_terminal(alice.id).await;

    assert!(ctx.deps.manager.get(alice.id, Some("alice")).await.is_ok());
    assert!(matches!(
        ctx.deps.manager.get(alice.id, Some("bob")).await,
        Err(TaskError::NotFound(_))
    ));
    assert!(matches!(
        ctx.deps.manager.delete(alice.id, Some("bob")).await,
        Err(TaskError::NotFound(_))
    ));

    let page = ctx
        .deps
        .manager
        .list(&TaskQuery {
            owner_id: Some("alice".to_string()),
            ..TaskQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.tasks[0].id, alice.id);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_delete_refuses_running_tasks(ctx: &mut TestHarness) {
    let task = ctx.deps.manager.submit("gated", json!({}), None).await.unwrap();
    ctx.gate.wait_until_entered().await;

    let err = ctx.deps.manager.delete(task.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        TaskError::InvalidTransition {
            status: TaskStatus::Running,
            ..
        }
    ));

    ctx.gate.release();
    ctx.wait_for_terminal(task.id).await;
    ctx.deps.manager.delete(task.id, None).await.unwrap();
    assert!(ctx.store.find_by_id(task.id).await.unwrap().is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_list_pages_newest_first(ctx: &mut TestHarness) {
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(insert_pending(ctx.store.as_ref(), "echo", json!({})).await.id);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let page = ctx
        .deps
        .manager
        .list(&TaskQuery {
            page: 2,
            page_size: 2,
            ..TaskQuery::default()
        })
        .await
        .unwrap();

    assert_eq!(page.total, 5);
    assert_eq!(page.page, 2);
    let listed: Vec<_> = page.tasks.iter().map(|t| t.id).collect();
    assert_eq!(listed, vec![ids[2], ids[1]]);
}
