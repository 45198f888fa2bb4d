use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;

use crate::api::errors::ApiError;
use crate::api::guards::Caller;
use crate::core::state::AppState;
use crate::db::models::AnswerSheet;
use crate::schemas::attempt::{
    AnswerRecordedResponse, AnswerUpdate, AttemptSubmit, SubmissionResponse,
};
use crate::services::reporting::{self, AttemptDetail};
use crate::services::{attempts, submission};

pub(super) async fn get_attempt(
    Path(attempt_id): Path<String>,
    caller: Caller,
    State(state): State<AppState>,
) -> Result<Json<AttemptDetail>, ApiError> {
    caller.require_student()?;
    Ok(Json(reporting::attempt_detail(&state, &caller.user_id, &attempt_id).await?))
}

pub(super) async fn record_answer(
    Path((attempt_id, question_id)): Path<(String, String)>,
    caller: Caller,
    State(state): State<AppState>,
    Json(payload): Json<AnswerUpdate>,
) -> Result<Json<AnswerRecordedResponse>, ApiError> {
    caller.require_student()?;

    let recorded = attempts::record_answer(
        &state,
        &caller.user_id,
        &attempt_id,
        &question_id,
        payload.selected_index,
    )
    .await?;
    Ok(Json(recorded.into()))
}

/// An empty body submits the buffer as is. Anything else must parse, because sealing is final.
fn final_answers(body: &[u8]) -> Result<Option<AnswerSheet>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let payload: AttemptSubmit = serde_json::from_slice(body)
        .map_err(|err| ApiError::BadRequest(format!("Invalid submit body: {err}")))?;
    Ok(payload.answers)
}

pub(super) async fn submit_attempt(
    Path(attempt_id): Path<String>,
    caller: Caller,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SubmissionResponse>, ApiError> {
    caller.require_student()?;
    let answers = final_answers(&body)?;

    let receipt =
        submission::submit_for_student(&state, &caller.user_id, &attempt_id, answers).await?;
    let attempt = reporting::attempt_detail(&state, &caller.user_id, &receipt.attempt.id).await?;

    Ok(Json(SubmissionResponse { accepted: receipt.accepted, attempt }))
}
