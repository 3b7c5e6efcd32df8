//! Task submission, query, cancellation and deletion.

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::kernel::tasks::{Task, TaskPage, TaskQuery, TaskStatus, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::server::app::AppState;
use crate::server::error::ApiError;

/// Optional caller identity; when present, other owners' tasks are invisible.
pub const OWNER_HEADER: &str = "x-owner-id";

pub(crate) fn owner_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub crawler_type: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

/// A task plus fields derived for API consumers.
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    #[serde(flatten)]
    pub task: Task,
    pub duration_secs: Option<f64>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            duration_secs: task.duration_secs(),
            task,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub total: i64,
    pub tasks: Vec<TaskResponse>,
    pub page: u32,
    pub page_size: u32,
}

impl From<TaskPage> for TaskListResponse {
    fn from(page: TaskPage) -> Self {
        Self {
            total: page.total,
            tasks: page.tasks.into_iter().map(TaskResponse::from).collect(),
            page: page.page,
            page_size: page.page_size,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTasksParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub status: Option<String>,
    pub crawler_type: Option<String>,
    pub owner_id: Option<String>,
}

impl ListTasksParams {
    /// Validate and convert; the owner header, when sent, overrides `owner_id`.
    pub fn into_query(self, owner: Option<String>) -> Result<TaskQuery, ApiError> {
        let page = self.page.unwrap_or(1);
        if page < 1 {
            return Err(ApiError::BadRequest("page must be >= 1".to_string()));
        }

        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ApiError::BadRequest(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let status = self
            .status
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<TaskStatus>())
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        Ok(TaskQuery {
            page,
            page_size,
            status,
            crawler_type: self.crawler_type.filter(|s| !s.is_empty()),
            owner_id: owner.or(self.owner_id.filter(|s| !s.is_empty())),
        })
    }
}

/// POST /api/tasks
pub async fn submit_task_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), ApiError> {
    let params = match request.params {
        Value::Null => Value::Object(Map::new()),
        params => params,
    };

    let task = state
        .deps
        .manager
        .submit(&request.crawler_type, params, owner_id(&headers))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTaskResponse {
            task_id: task.id,
            status: task.status,
        }),
    ))
}

/// GET /api/tasks
pub async fn list_tasks_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListTasksParams>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let query = params.into_query(owner_id(&headers))?;
    let page = state.deps.manager.list(&query).await?;
    Ok(Json(page.into()))
}

/// GET /api/tasks/:task_id
pub async fn get_task_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskResponse>, ApiError> {
    let owner = owner_id(&headers);
    let task = state.deps.manager.get(task_id, owner.as_deref()).await?;
    Ok(Json(task.into()))
}

/// POST /api/tasks/:task_id/cancel
pub async fn cancel_task_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskResponse>, ApiError> {
    let owner = owner_id(&headers);
    let task = state.deps.manager.cancel(task_id, owner.as_deref()).await?;
    Ok(Json(task.into()))
}

/// DELETE /api/tasks/:task_id
pub async fn delete_task_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let owner = owner_id(&headers);
    state.deps.manager.delete(task_id, owner.as_deref()).await?;
    Ok(StatusCode::NO_CONTENT)
}
