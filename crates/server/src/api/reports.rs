//! Error report API handlers.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use harvester_core::{ErrorReport, FailureKind, ReportFilter, WorkerKind};

use super::handlers::{error_response, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for report queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for report queries
const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for the reports endpoint
#[derive(Debug, Deserialize)]
pub struct ReportQueryParams {
    pub repository_id: Option<String>,
    pub record_id: Option<i64>,
    /// "identifier" or "object"
    pub worker: Option<String>,
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReportQueryResponse {
    /// Newest first
    pub reports: Vec<ErrorReport>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Query stored error reports
pub async fn query_reports(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReportQueryParams>,
) -> Result<Json<ReportQueryResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = ReportFilter::new();
    if let Some(ref repository_id) = params.repository_id {
        filter = filter.with_repository(repository_id);
    }
    if let Some(record_id) = params.record_id {
        filter = filter.with_record(record_id);
    }
    if let Some(ref worker) = params.worker {
        let worker: WorkerKind = worker
            .parse()
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;
        filter = filter.with_worker(worker);
    }
    if let Some(ref kind) = params.kind {
        let kind: FailureKind = kind
            .parse()
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;
        filter = filter.with_kind(kind);
    }

    let total = state.reports().count(&filter).map_err(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to count error reports: {}", e),
        )
    })?;
    let reports = state
        .reports()
        .query(&filter.with_limit(limit).with_offset(offset))
        .map_err(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to query error reports: {}", e),
            )
        })?;

    Ok(Json(ReportQueryResponse {
        reports,
        total,
        limit,
        offset,
    }))
}
