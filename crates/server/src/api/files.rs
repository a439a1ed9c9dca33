//! Manifest browsing handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use orbitflow_core::{FileRecord, FileStatus, ManifestFilter, StageMetric};

use super::handlers::{error_response, internal_error, ErrorResponse};
use crate::state::AppState;

/// Maximum allowed limit for file queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for file queries
const DEFAULT_LIMIT: i64 = 100;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

/// Query parameters for listing files
#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
    /// Filter by status (case-insensitive, e.g. `complete`)
    pub status: Option<String>,
    pub satellite: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct FileMetricsResponse {
    pub file_id: String,
    pub metrics: Vec<StageMetric>,
}

/// List manifest records, newest first.
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListFilesParams>,
) -> ApiResult<ListFilesResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = ManifestFilter::new().with_limit(limit).with_offset(offset);
    if let Some(ref status) = params.status {
        let status = FileStatus::from_str(status)
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;
        filter = filter.with_status(status);
    }
    if let Some(satellite) = params.satellite {
        filter = filter.with_satellite(satellite);
    }

    let files = state.manifest().list(&filter).map_err(internal_error)?;
    let total = state.manifest().count(&filter).map_err(internal_error)?;

    Ok(Json(ListFilesResponse {
        files,
        total,
        limit,
        offset,
    }))
}

pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> ApiResult<FileRecord> {
    match state.manifest().get(&file_id) {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("File not found: {}", file_id),
        )),
        Err(e) => Err(internal_error(e)),
    }
}

/// Stage metrics for one file, oldest first.
pub async fn get_file_metrics(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> ApiResult<FileMetricsResponse> {
    if state.manifest().get(&file_id).map_err(internal_error)?.is_none() {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            format!("File not found: {}", file_id),
        ));
    }

    let metrics = state
        .metric_store()
        .metrics_for(&file_id)
        .map_err(internal_error)?;
    Ok(Json(FileMetricsResponse { file_id, metrics }))
}
