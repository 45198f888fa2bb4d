use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::Caller;
use crate::core::state::AppState;
use crate::db::models::TestSession;
use crate::schemas::attempt::AttemptBeginResponse;
use crate::schemas::session::{SessionClosedResponse, SessionCreate, SessionResponse, SessionStart};
use crate::services::reporting::{self, LiveStatus, SessionResults};
use crate::services::{attempts, sessions};

async fn owned_session(
    state: &AppState,
    caller: &Caller,
    session_id: &str,
) -> Result<TestSession, ApiError> {
    caller.require_teacher()?;
    let session = sessions::find_session(state, session_id).await?;
    caller.require_owner(&session)?;
    Ok(session)
}

pub(super) async fn create_session(
    caller: Caller,
    State(state): State<AppState>,
    Json(payload): Json<SessionCreate>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    caller.require_teacher()?;
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let session = sessions::create_session(&state, payload.into_new_session(&caller.user_id)).await?;
    Ok((StatusCode::CREATED, Json(session.into())))
}

pub(super) async fn get_session(
    Path(session_id): Path<String>,
    caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = owned_session(&state, &caller, &session_id).await?;
    Ok(Json(session.into()))
}

pub(super) async fn start_session(
    Path(session_id): Path<String>,
    caller: Caller,
    State(state): State<AppState>,
    Json(payload): Json<SessionStart>,
) -> Result<Json<SessionResponse>, ApiError> {
    owned_session(&state, &caller, &session_id).await?;
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let session = sessions::activate(&state, &session_id, payload.duration_minutes).await?;
    Ok(Json(session.into()))
}

pub(super) async fn stop_session(
    Path(session_id): Path<String>,
    caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<SessionClosedResponse>, ApiError> {
    owned_session(&state, &caller, &session_id).await?;
    let closed = sessions::force_complete(&state, &session_id).await?;
    Ok(Json(closed.into()))
}

pub(super) async fn cancel_session(
    Path(session_id): Path<String>,
    caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<SessionClosedResponse>, ApiError> {
    owned_session(&state, &caller, &session_id).await?;
    let closed = sessions::cancel(&state, &session_id).await?;
    Ok(Json(closed.into()))
}

pub(super) async fn live_status(
    Path(session_id): Path<String>,
    caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<LiveStatus>, ApiError> {
    let session = owned_session(&state, &caller, &session_id).await?;
    Ok(Json(reporting::live_status(&state, &session).await?))
}

pub(super) async fn session_results(
    Path(session_id): Path<String>,
    caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<SessionResults>, ApiError> {
    let session = owned_session(&state, &caller, &session_id).await?;
    Ok(Json(reporting::session_results(&state, &session).await?))
}

pub(super) async fn begin_attempt(
    Path(session_id): Path<String>,
    caller: Caller,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<AttemptBeginResponse>), ApiError> {
    caller.require_student()?;

    let (attempt, created) =
        attempts::get_or_create_attempt(&state, &session_id, &caller.user_id).await?;
    let session = sessions::find_session(&state, &session_id).await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    let attempt = reporting::build_attempt_detail(&session, attempt);
    Ok((status, Json(AttemptBeginResponse { created, attempt })))
}
