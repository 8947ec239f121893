use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{daemons, handlers, middleware::metrics_middleware, records, reports, repositories, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Repositories
        .route(
            "/repositories",
            get(repositories::list_repositories).post(repositories::create_repository),
        )
        .route("/repositories/{id}", get(repositories::get_repository))
        .route("/repositories/{id}/harvest", post(repositories::start_harvest))
        .route("/repositories/{id}/interrupt", post(repositories::interrupt_harvest))
        .route("/repositories/{id}/resume", post(repositories::resume_repository))
        .route("/repositories/{id}/enable", post(repositories::enable_repository))
        .route("/repositories/{id}/disable", post(repositories::disable_repository))
        .route("/repositories/{id}/reset-failed", post(repositories::reset_failed_records))
        // Records
        .route("/records", get(records::list_records))
        .route("/records/counts", get(records::status_counts))
        .route("/records/{id}", get(records::get_record))
        .route("/records/{id}/reset", post(records::reset_record))
        // Error reports
        .route("/reports", get(reports::query_reports))
        // Daemons
        .route("/daemons", get(daemons::get_status))
        .route("/daemons/{name}/pause", post(daemons::pause_intake))
        .route("/daemons/{name}/resume", post(daemons::resume_intake))
        .route("/calendar/run", post(daemons::run_calendar))
        // Live notifications
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
