use axum::{extract::Extension, http::HeaderMap, Json};
use serde::Serialize;

use crate::kernel::tasks::TaskStats;
use crate::server::app::AppState;
use crate::server::error::ApiError;
use crate::server::routes::tasks::owner_id;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub tasks: TaskStats,
    pub uptime_secs: u64,
}

/// GET /api/stats
pub async fn stats_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, ApiError> {
    let owner = owner_id(&headers);
    let tasks = state.deps.manager.stats(owner.as_deref()).await?;

    Ok(Json(StatsResponse {
        tasks,
        uptime_secs: state.started_at.elapsed().as_secs(),
    }))
}
