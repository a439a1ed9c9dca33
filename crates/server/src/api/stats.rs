//! Aggregate statistics handlers.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use orbitflow_core::manifest::{HourlyStats, QueryLogEntry, StatusCount};

use super::handlers::{internal_error, ErrorResponse};
use crate::state::AppState;

const DEFAULT_HOURS: usize = 24;
const MAX_HOURS: usize = 24 * 30;
const DEFAULT_QUERIES: usize = 50;
const MAX_QUERIES: usize = 1000;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    /// Counts by status for files acquired in the last 24 hours.
    pub statuses: Vec<StatusCount>,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct HourlyResponse {
    pub hours: Vec<HourlyStats>,
}

#[derive(Debug, Serialize)]
pub struct QueriesResponse {
    pub queries: Vec<QueryLogEntry>,
}

pub async fn get_summary(State(state): State<Arc<AppState>>) -> ApiResult<SummaryResponse> {
    let statuses = state.manifest().status_summary().map_err(internal_error)?;
    let total = statuses.iter().map(|s| s.count).sum();
    Ok(Json(SummaryResponse { statuses, total }))
}

/// Per-hour processing aggregates, most recent hour first.
pub async fn get_hourly(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> ApiResult<HourlyResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_HOURS).clamp(1, MAX_HOURS);
    let hours = state.manifest().hourly_stats(limit).map_err(internal_error)?;
    Ok(Json(HourlyResponse { hours }))
}

/// Recent catalog poll log, newest first.
pub async fn get_queries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> ApiResult<QueriesResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_QUERIES).clamp(1, MAX_QUERIES);
    let queries = state
        .manifest()
        .recent_queries(limit)
        .map_err(internal_error)?;
    Ok(Json(QueriesResponse { queries }))
}
