use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use orbitflow_core::manifest::{HealthCheck, HealthStatus};
use orbitflow_core::{ManifestFilter, QueueName, SanitizedConfig};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

/// Service name written to `health_checks`.
const HEALTH_SERVICE: &str = "orbitflow";

/// Error body shared by every API handler.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) fn error_response(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub(crate) fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub manifest: bool,
    pub queue: bool,
    pub pipeline_running: bool,
    pub response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Liveness probe. Touches the manifest and the queue, records the outcome
/// in `health_checks`, and answers 503 when either is unusable.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let started = Instant::now();

    let manifest = state.manifest().count(&ManifestFilter::new().with_limit(1));
    let queue = state.queue().depth(QueueName::Download);

    let mut problems = Vec::new();
    if let Err(ref e) = manifest {
        problems.push(format!("manifest: {}", e));
    }
    if let Err(ref e) = queue {
        problems.push(format!("queue: {}", e));
    }

    let status = if problems.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };
    let message = (!problems.is_empty()).then(|| problems.join("; "));
    let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    let check = HealthCheck {
        id: None,
        service: HEALTH_SERVICE.to_string(),
        status,
        message: message.clone(),
        response_time_ms: Some(response_time_ms),
        checked_at: Utc::now(),
    };
    if let Err(e) = state.manifest().record_health_check(&check) {
        warn!("Failed to record health check: {}", e);
    }

    let code = if status == HealthStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status,
            manifest: manifest.is_ok(),
            queue: queue.is_ok(),
            pipeline_running: state.runner().is_running(),
            response_time_ms,
            message,
        }),
    )
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
