//! Scheduler daemon API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use harvester_core::RunState;
use tracing::info;

use super::handlers::{error_response, ApiError};
use crate::state::AppState;

const IDENTIFIER_DAEMON: &str = "identifier-harvester";
const OBJECT_DAEMON: &str = "object-harvester";

/// Status of both daemons
#[derive(Debug, Serialize)]
pub struct DaemonsResponse {
    pub daemons: Vec<RunState>,
}

#[derive(Debug, Serialize)]
pub struct CalendarRunResponse {
    pub requested: usize,
}

#[derive(Clone, Copy)]
enum IntakeAction {
    Pause,
    Resume,
}

/// Get the run state of both daemons
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<DaemonsResponse> {
    Json(DaemonsResponse {
        daemons: vec![
            state.identifier_daemon().run_state().await,
            state.object_daemon().run_state().await,
        ],
    })
}

/// Stop admitting new workers; running workers finish
pub async fn pause_intake(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<RunState>, ApiError> {
    set_intake(&state, &name, IntakeAction::Pause).await
}

/// Start admitting new workers again
pub async fn resume_intake(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<RunState>, ApiError> {
    set_intake(&state, &name, IntakeAction::Resume).await
}

async fn set_intake(
    state: &AppState,
    name: &str,
    action: IntakeAction,
) -> Result<Json<RunState>, ApiError> {
    let run_state = match (name, action) {
        (IDENTIFIER_DAEMON, IntakeAction::Pause) => {
            state.identifier_daemon().pause_intake().await;
            state.identifier_daemon().run_state().await
        }
        (IDENTIFIER_DAEMON, IntakeAction::Resume) => {
            state.identifier_daemon().resume_intake().await;
            state.identifier_daemon().run_state().await
        }
        (OBJECT_DAEMON, IntakeAction::Pause) => {
            state.object_daemon().pause_intake().await;
            state.object_daemon().run_state().await
        }
        (OBJECT_DAEMON, IntakeAction::Resume) => {
            state.object_daemon().resume_intake().await;
            state.object_daemon().run_state().await
        }
        _ => {
            return Err(error_response(
                StatusCode::NOT_FOUND,
                format!("Unknown daemon: {}", name),
            ))
        }
    };
    info!(daemon = name, running = run_state.running, "Intake changed by operator");
    Ok(Json(run_state))
}

/// Run the calendar now instead of waiting for its next interval
pub async fn run_calendar(State(state): State<Arc<AppState>>) -> Json<CalendarRunResponse> {
    let requested = state.calendar().run_once(Utc::now());
    info!(requested, "Calendar run requested by operator");
    Json(CalendarRunResponse { requested })
}
