use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{files, handlers, middleware::metrics_middleware, pipeline, stats};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Pipeline
        .route("/pipeline/status", get(pipeline::get_status))
        .route("/pipeline/poll", post(pipeline::trigger_poll))
        .route("/queues", get(pipeline::get_queues))
        // Manifest
        .route("/files", get(files::list_files))
        .route("/files/{file_id}", get(files::get_file))
        .route("/files/{file_id}/metrics", get(files::get_file_metrics))
        // Statistics
        .route("/stats/summary", get(stats::get_summary))
        .route("/stats/hourly", get(stats::get_hourly))
        .route("/queries", get(stats::get_queries))
        .with_state(Arc::clone(&state));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
