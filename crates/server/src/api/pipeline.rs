//! Pipeline API handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use orbitflow_core::queue::QueueDepth;
use orbitflow_core::{PipelineStatus, PollError, PollReport, QueueName};

use super::handlers::{error_response, internal_error, ErrorResponse};
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

// ============================================================================
// Response Types
// ============================================================================

/// Queue depths response
#[derive(Debug, Serialize)]
pub struct QueuesResponse {
    pub download: QueueDepth,
    pub processing: QueueDepth,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get running flag, queue depths, 24h status counts and the last poll.
pub async fn get_status(State(state): State<Arc<AppState>>) -> ApiResult<PipelineStatus> {
    state
        .runner()
        .status()
        .await
        .map(Json)
        .map_err(internal_error)
}

/// Run one discovery cycle now.
pub async fn trigger_poll(State(state): State<Arc<AppState>>) -> ApiResult<PollReport> {
    match state.runner().trigger_poll().await {
        Ok(report) => Ok(Json(report)),
        Err(PollError::NotConfigured) => Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "No catalog configured",
        )),
        Err(e @ (PollError::Catalog(_) | PollError::Timeout { .. })) => {
            Err(error_response(StatusCode::BAD_GATEWAY, e.to_string()))
        }
        Err(e) => Err(internal_error(e)),
    }
}

pub async fn get_queues(State(state): State<Arc<AppState>>) -> ApiResult<QueuesResponse> {
    let queue = state.queue();
    Ok(Json(QueuesResponse {
        download: queue.depth(QueueName::Download).map_err(internal_error)?,
        processing: queue.depth(QueueName::Processing).map_err(internal_error)?,
    }))
}
