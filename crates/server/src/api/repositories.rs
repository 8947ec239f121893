//! Repository API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use harvester_core::{
    ControllerError, HarvestState, NewRepository, Repository, RepositoryError, RepositoryFilter,
    StatusCounts,
};

use super::handlers::{error_response, ApiError};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing repositories
#[derive(Debug, Deserialize)]
pub struct ListRepositoriesParams {
    /// Filter by harvest state
    pub state: Option<String>,
    /// Filter by enablement
    pub enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ListRepositoriesResponse {
    pub repositories: Vec<Repository>,
    pub total: usize,
}

/// A repository with its record counts
#[derive(Debug, Serialize)]
pub struct RepositoryDetail {
    #[serde(flatten)]
    pub repository: Repository,
    pub records: StatusCounts,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub reset: usize,
}

fn store_error(e: RepositoryError) -> ApiError {
    match e {
        RepositoryError::NotFound(_) => error_response(StatusCode::NOT_FOUND, e),
        RepositoryError::AlreadyExists(_) => error_response(StatusCode::CONFLICT, e),
        RepositoryError::Database(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

fn controller_error(e: ControllerError) -> ApiError {
    match e {
        ControllerError::NotFound(_) => error_response(StatusCode::NOT_FOUND, e),
        ControllerError::Store(e) => store_error(e),
        ControllerError::AlreadyHarvesting(_)
        | ControllerError::Paused(_)
        | ControllerError::Disabled(_)
        | ControllerError::InvalidState { .. } => error_response(StatusCode::CONFLICT, e),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// List repositories with optional filters
pub async fn list_repositories(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRepositoriesParams>,
) -> Result<Json<ListRepositoriesResponse>, ApiError> {
    let mut filter = RepositoryFilter::new();
    if let Some(ref harvest_state) = params.state {
        let harvest_state: HarvestState = harvest_state
            .parse()
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;
        filter = filter.with_state(harvest_state);
    }
    if let Some(enabled) = params.enabled {
        filter = filter.with_enabled(enabled);
    }

    let repositories = state.repositories().list(&filter).map_err(store_error)?;
    Ok(Json(ListRepositoriesResponse {
        total: repositories.len(),
        repositories,
    }))
}

/// Register a repository after checking its OAI-PMH settings
pub async fn create_repository(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewRepository>,
) -> Result<(StatusCode, Json<Repository>), ApiError> {
    if body.id.trim().is_empty() || body.url.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "id and url are required",
        ));
    }
    state
        .validator()
        .validate(&body)
        .await
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;
    let repository = state.repositories().create(body).map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(repository)))
}

/// Get a repository with its record counts
pub async fn get_repository(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RepositoryDetail>, ApiError> {
    let repository = state
        .repositories()
        .get(&id)
        .map_err(store_error)?
        .ok_or_else(|| {
            error_response(StatusCode::NOT_FOUND, format!("Repository not found: {}", id))
        })?;
    let records = state
        .records()
        .status_counts(Some(&id))
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(RepositoryDetail {
        repository,
        records,
    }))
}

/// Request a harvest; the identifier daemon starts it on its next tick
pub async fn start_harvest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Repository>), ApiError> {
    let repository = state.controller().request_harvest(&id).map_err(controller_error)?;
    Ok((StatusCode::ACCEPTED, Json(repository)))
}

/// Stop a running harvest after its current page
pub async fn interrupt_harvest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.identifier_daemon().source().interrupt(&id) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(error_response(
            StatusCode::CONFLICT,
            format!("Repository {} is not harvesting", id),
        ))
    }
}

/// Leave PAUSED_ON_ERROR
pub async fn resume_repository(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Repository>, ApiError> {
    state.controller().resume(&id).map(Json).map_err(controller_error)
}

pub async fn enable_repository(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Repository>, ApiError> {
    state
        .controller()
        .set_enabled(&id, true)
        .map(Json)
        .map_err(controller_error)
}

pub async fn disable_repository(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Repository>, ApiError> {
    state
        .controller()
        .set_enabled(&id, false)
        .map(Json)
        .map_err(controller_error)
}

/// Return every FAILED record of the repository to PENDING
pub async fn reset_failed_records(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ResetResponse>, ApiError> {
    if state.repositories().get(&id).map_err(store_error)?.is_none() {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Repository not found: {}", id),
        ));
    }
    let reset = state
        .records()
        .reset_failed(&id)
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(ResetResponse { reset }))
}
