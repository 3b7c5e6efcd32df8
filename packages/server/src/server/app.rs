//! Application setup and server configuration.

use std::time::Instant;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::kernel::ServerDeps;
use crate::server::routes::{
    cancel_task_handler, delete_task_handler, describe_crawler_handler, get_task_handler,
    health_handler, list_crawlers_handler, list_tasks_handler, stats_handler,
    submit_task_handler, task_ws_handler, OWNER_HEADER,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub deps: ServerDeps,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(deps: ServerDeps) -> Self {
        Self {
            deps,
            started_at: Instant::now(),
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(OWNER_HEADER)])
}

/// Build the Axum application router
pub fn build_app(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/crawlers", get(list_crawlers_handler))
        .route("/api/crawlers/:crawler_type", get(describe_crawler_handler))
        .route(
            "/api/tasks",
            post(submit_task_handler).get(list_tasks_handler),
        )
        .route(
            "/api/tasks/:task_id",
            get(get_task_handler).delete(delete_task_handler),
        )
        .route("/api/tasks/:task_id/cancel", post(cancel_task_handler))
        .route("/ws/tasks/:task_id", get(task_ws_handler))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(Extension(state))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}
