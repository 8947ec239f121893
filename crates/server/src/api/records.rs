//! Record API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use harvester_core::{ProcessStatus, Record, RecordFilter, StatusCounts};
use tracing::info;

use super::handlers::{error_response, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for record queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for record queries
const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for listing records
#[derive(Debug, Deserialize)]
pub struct ListRecordsParams {
    pub repository_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListRecordsResponse {
    pub records: Vec<Record>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Query parameters for status counts
#[derive(Debug, Deserialize)]
pub struct CountsParams {
    pub repository_id: Option<String>,
}

/// List records with optional filters
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRecordsParams>,
) -> Result<Json<ListRecordsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = RecordFilter::new();
    if let Some(ref repository_id) = params.repository_id {
        filter = filter.with_repository(repository_id);
    }
    if let Some(ref status) = params.status {
        let status: ProcessStatus = status
            .parse()
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;
        filter = filter.with_status(status);
    }

    let internal = |e: harvester_core::RecordError| {
        error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
    };
    let total = state.records().count(&filter).map_err(internal)?;
    let records = state
        .records()
        .list(&filter.with_limit(limit).with_offset(offset))
        .map_err(internal)?;

    Ok(Json(ListRecordsResponse {
        records,
        total,
        limit,
        offset,
    }))
}

/// Get a record by id
pub async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Record>, ApiError> {
    match state.records().get(id) {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Record not found: {}", id),
        )),
        Err(e) => Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

/// Put one record back to PENDING
pub async fn reset_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Record>, ApiError> {
    let internal = |e: harvester_core::RecordError| {
        error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
    };
    let Some(record) = state.records().get(id).map_err(internal)? else {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Record not found: {}", id),
        ));
    };
    if !state.records().reset(id).map_err(internal)? {
        return Err(error_response(
            StatusCode::CONFLICT,
            format!("Record {} is {} and cannot be reset", id, record.status),
        ));
    }
    info!(record_id = id, from = %record.status, "Record reset by operator");

    match state.records().get(id).map_err(internal)? {
        Some(record) => Ok(Json(record)),
        None => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Record not found: {}", id),
        )),
    }
}

/// Record counts per status, optionally for one repository
pub async fn status_counts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CountsParams>,
) -> Result<Json<StatusCounts>, ApiError> {
    state
        .records()
        .status_counts(params.repository_id.as_deref())
        .map(Json)
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e))
}
