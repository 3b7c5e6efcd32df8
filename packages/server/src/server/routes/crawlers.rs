use axum::{
    extract::{Extension, Path},
    Json,
};

use crate::kernel::tasks::{CrawlerDescriptor, RegistryError};
use crate::server::app::AppState;
use crate::server::error::ApiError;

/// GET /api/crawlers
pub async fn list_crawlers_handler(
    Extension(state): Extension<AppState>,
) -> Json<Vec<CrawlerDescriptor>> {
    Json(state.deps.registry.list())
}

/// GET /api/crawlers/:crawler_type
pub async fn describe_crawler_handler(
    Extension(state): Extension<AppState>,
    Path(crawler_type): Path<String>,
) -> Result<Json<CrawlerDescriptor>, ApiError> {
    state
        .deps
        .registry
        .describe(&crawler_type)
        .cloned()
        .map(Json)
        .ok_or_else(|| RegistryError::UnknownCrawlerType(crawler_type).into())
}
