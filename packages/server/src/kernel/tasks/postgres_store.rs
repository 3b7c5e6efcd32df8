//! PostgreSQL task store.
//!
//! Each conditional write is one `UPDATE ... WHERE status = ANY(..) RETURNING *`
//! statement, so the row lock taken by Postgres serializes racing writers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Task, TaskFilter, TaskStatus, TaskStore, TaskTransition};

#[derive(Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn create(&self, task: &Task) -> Result<Task> {
        sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (
                id, owner_id, crawler_type, status, progress, params,
                result, error, created_at, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(task.id)
        .bind(&task.owner_id)
        .bind(&task.crawler_type)
        .bind(task.status)
        .bind(task.progress)
        .bind(&task.params)
        .bind(&task.result)
        .bind(&task.error)
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert task")
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>> {
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load task")
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE ($1::task_status IS NULL OR status = $1)
              AND ($2::text IS NULL OR crawler_type = $2)
              AND ($3::text IS NULL OR owner_id = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.status)
        .bind(&filter.crawler_type)
        .bind(&filter.owner_id)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list tasks")
    }

    async fn count(&self, filter: &TaskFilter) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM tasks
            WHERE ($1::task_status IS NULL OR status = $1)
              AND ($2::text IS NULL OR crawler_type = $2)
              AND ($3::text IS NULL OR owner_id = $3)
            "#,
        )
        .bind(filter.status)
        .bind(&filter.crawler_type)
        .bind(&filter.owner_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count tasks")?;

        Ok(count)
    }

    async fn delete(&self, id: Uuid, only_if: &[TaskStatus]) -> Result<bool> {
        let statuses: Vec<String> = only_if.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1 AND status::text = ANY($2)")
            .bind(id)
            .bind(&statuses)
            .execute(&self.pool)
            .await
            .context("Failed to delete task")?;

        Ok(result.rows_affected() > 0)
    }

    async fn transition(&self, id: Uuid, transition: &TaskTransition) -> Result<Option<Task>> {
        sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET status = $2,
                progress = COALESCE($3, progress),
                result = COALESCE($4, result),
                error = COALESCE($5, error),
                started_at = CASE WHEN $2 = 'running'::task_status
                                  THEN COALESCE(started_at, $6)
                                  ELSE started_at END,
                completed_at = CASE WHEN $7
                                    THEN COALESCE(completed_at, $6)
                                    ELSE completed_at END
            WHERE id = $1 AND status::text = ANY($8)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(transition.to)
        .bind(transition.progress)
        .bind(&transition.result)
        .bind(&transition.error)
        .bind(transition.at)
        .bind(transition.to.is_terminal())
        .bind(transition.from_names())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to move task {} to {}", id, transition.to))
    }

    async fn update_progress(&self, id: Uuid, progress: i32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET progress = $2
            WHERE id = $1 AND status = 'running' AND progress < $2
            "#,
        )
        .bind(id)
        .bind(progress)
        .execute(&self.pool)
        .await
        .context("Failed to update task progress")?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>> {
        sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE status = 'running'
              AND COALESCE(started_at, created_at) < $1
            ORDER BY COALESCE(started_at, created_at)
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("Failed to find stale tasks")
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}
