mod handlers;

use axum::{routing::get, routing::post, Router};

use crate::core::state::AppState;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::create_session))
        .route("/:session_id", get(handlers::get_session))
        .route("/:session_id/start", post(handlers::start_session))
        .route("/:session_id/stop", post(handlers::stop_session))
        .route("/:session_id/cancel", post(handlers::cancel_session))
        .route("/:session_id/live-status", get(handlers::live_status))
        .route("/:session_id/results", get(handlers::session_results))
        .route("/:session_id/attempts", post(handlers::begin_attempt))
}
