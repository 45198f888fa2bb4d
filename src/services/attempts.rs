use sqlx::types::Json;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::db::models::{Attempt, PaperSnapshot};
use crate::db::types::{AttemptStatus, QuestionKind};
use crate::services::errors::EngineError;
use crate::services::submission;

#[derive(Debug, Clone)]
pub(crate) struct RecordedAnswer {
    pub(crate) attempt_id: String,
    pub(crate) question_id: String,
    pub(crate) selected_index: Option<u32>,
    pub(crate) recorded_at: PrimitiveDateTime,
}

/// Checks that `question_id` belongs to the paper and that an objective selection points at
/// one of its options.
pub(crate) fn validate_selection(
    paper: &PaperSnapshot,
    question_id: &str,
    selection: Option<u32>,
) -> Result<(), EngineError> {
    let question = paper.question(question_id).ok_or(EngineError::NotFound("Question"))?;

    match (question.kind, selection) {
        (QuestionKind::Objective, Some(index)) if (index as usize) >= question.options.len() => {
            Err(EngineError::InvalidAnswer(format!(
                "Option {index} is out of range for question {question_id}"
            )))
        }
        _ => Ok(()),
    }
}

/// Returns the student's attempt for the session, creating it on first access. The bool is
/// true when this call created it.
pub(crate) async fn get_or_create_attempt(
    state: &AppState,
    session_id: &str,
    student_id: &str,
) -> Result<(Attempt, bool), EngineError> {
    let session =
        state.store().find_session(session_id).await?.ok_or(EngineError::NotFound("Session"))?;

    if !session.is_on_roster(student_id) {
        return Err(EngineError::NotFound("Session"));
    }

    let now = state.clock().now();
    if !session.is_open_at(now) {
        return Err(EngineError::SessionNotActive { session_id: session.id });
    }

    let candidate = Attempt {
        id: Uuid::new_v4().to_string(),
        session_id: session.id.clone(),
        student_id: student_id.to_string(),
        status: AttemptStatus::InProgress,
        answers: Json(session.paper_snapshot.0.blank_answers()),
        started_at: now,
        submitted_at: None,
        total_time_seconds: None,
        score_card: None,
        score_error: None,
        created_at: now,
        updated_at: now,
    };

    let (attempt, created) = state.store().insert_attempt_if_absent(&candidate).await?;
    if !created {
        return Ok((attempt, false));
    }

    metrics::counter!("attempts_started_total").increment(1);
    tracing::info!(
        attempt_id = %attempt.id,
        session_id = %attempt.session_id,
        student_id = %attempt.student_id,
        "Attempt started"
    );

    // The session may have closed between the check above and the insert; its drain would
    // then have missed this row.
    let current =
        state.store().find_session(session_id).await?.ok_or(EngineError::NotFound("Session"))?;
    if current.status.is_terminal() {
        submission::force_timeout(state, &attempt.id).await?;
        return Err(EngineError::SessionNotActive { session_id: current.id });
    }

    Ok((attempt, true))
}

pub(crate) async fn record_answer(
    state: &AppState,
    student_id: &str,
    attempt_id: &str,
    question_id: &str,
    selection: Option<u32>,
) -> Result<RecordedAnswer, EngineError> {
    let attempt =
        state.store().find_attempt(attempt_id).await?.ok_or(EngineError::NotFound("Attempt"))?;
    if attempt.student_id != student_id {
        return Err(EngineError::Forbidden("Attempt belongs to another student"));
    }

    let expired = || EngineError::AttemptExpired { attempt_id: attempt_id.to_string() };
    if attempt.is_terminal() {
        return Err(expired());
    }

    let session = state
        .store()
        .find_session(&attempt.session_id)
        .await?
        .ok_or(EngineError::NotFound("Session"))?;

    let now = state.clock().now();
    if !session.is_open_at(now) {
        return Err(expired());
    }

    validate_selection(&session.paper_snapshot.0, question_id, selection)?;

    if !state.store().record_answer(attempt_id, question_id, selection, now).await? {
        return Err(expired());
    }

    Ok(RecordedAnswer {
        attempt_id: attempt_id.to_string(),
        question_id: question_id.to_string(),
        selected_index: selection,
        recorded_at: now,
    })
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::db::types::SessionStatus;
    use crate::services::sessions;
    use crate::test_support::{self, STUDENT, TEACHER};

    #[tokio::test]
    async fn begin_attempt_is_idempotent() {
        let ctx = test_support::setup_engine().await;
        let session = ctx.active_session(30).await;

        let (first, created) = get_or_create_attempt(&ctx.state, &session.id, STUDENT).await.unwrap();
        assert!(created);
        assert_eq!(first.status, AttemptStatus::InProgress);
        assert_eq!(first.answers.0.len(), 10);
        assert!(first.answers.0.values().all(Option::is_none));

        ctx.clock.advance(Duration::minutes(5));
        let (second, created) =
            get_or_create_attempt(&ctx.state, &session.id, STUDENT).await.unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.started_at, first.started_at);
    }

    #[tokio::test]
    async fn begin_attempt_requires_an_open_session() {
        let ctx = test_support::setup_engine().await;
        let draft = ctx.draft_session().await;

        let err = get_or_create_attempt(&ctx.state, &draft.id, STUDENT).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionNotActive { .. }));

        sessions::activate(&ctx.state, &draft.id, 30).await.unwrap();
        ctx.clock.advance(Duration::minutes(30));
        let err = get_or_create_attempt(&ctx.state, &draft.id, STUDENT).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionNotActive { .. }));
    }

    #[tokio::test]
    async fn students_outside_the_roster_cannot_begin() {
        let ctx = test_support::setup_engine().await;
        let session = ctx.active_session(30).await;

        let err = get_or_create_attempt(&ctx.state, &session.id, "stranger").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound("Session")));
        let err = get_or_create_attempt(&ctx.state, &session.id, TEACHER).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound("Session")));
    }

    #[tokio::test]
    async fn answers_overwrite_and_can_be_cleared() {
        let ctx = test_support::setup_engine().await;
        let session = ctx.active_session(30).await;
        let (attempt, _) = get_or_create_attempt(&ctx.state, &session.id, STUDENT).await.unwrap();

        record_answer(&ctx.state, STUDENT, &attempt.id, "q01", Some(2)).await.unwrap();
        record_answer(&ctx.state, STUDENT, &attempt.id, "q01", Some(1)).await.unwrap();
        record_answer(&ctx.state, STUDENT, &attempt.id, "q02", Some(3)).await.unwrap();
        record_answer(&ctx.state, STUDENT, &attempt.id, "q02", None).await.unwrap();

        let stored = ctx.state.store().find_attempt(&attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.answers.0["q01"], Some(1));
        assert_eq!(stored.answers.0["q02"], None);
    }

    #[tokio::test]
    async fn answers_are_validated_against_the_paper() {
        let ctx = test_support::setup_engine().await;
        let session = ctx.active_session(30).await;
        let (attempt, _) = get_or_create_attempt(&ctx.state, &session.id, STUDENT).await.unwrap();

        let err = record_answer(&ctx.state, STUDENT, &attempt.id, "q99", Some(0)).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound("Question")));

        let err = record_answer(&ctx.state, STUDENT, &attempt.id, "q01", Some(4)).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidAnswer(_)));

        let err =
            record_answer(&ctx.state, "student-2", &attempt.id, "q01", Some(0)).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn record_answer_after_deadline_is_expired() {
        let ctx = test_support::setup_engine().await;
        let session = ctx.active_session(30).await;
        let (attempt, _) = get_or_create_attempt(&ctx.state, &session.id, STUDENT).await.unwrap();

        ctx.clock.advance(Duration::minutes(30));
        let err = record_answer(&ctx.state, STUDENT, &attempt.id, "q01", Some(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::AttemptExpired { .. }));

        let stored = ctx.state.store().find_attempt(&attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.answers.0["q01"], None);
        assert_eq!(stored.status, AttemptStatus::InProgress);
    }

    #[tokio::test]
    async fn record_answer_on_sealed_attempt_is_expired() {
        let ctx = test_support::setup_engine().await;
        let session = ctx.active_session(30).await;
        let (attempt, _) = get_or_create_attempt(&ctx.state, &session.id, STUDENT).await.unwrap();

        submission::submit_for_student(&ctx.state, STUDENT, &attempt.id, None).await.unwrap();
        let err = record_answer(&ctx.state, STUDENT, &attempt.id, "q01", Some(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::AttemptExpired { .. }));
    }

    #[tokio::test]
    async fn drain_seals_attempts_left_on_a_closed_session() {
        let ctx = test_support::setup_engine().await;
        let session = ctx.active_session(30).await;

        // Simulates a begin that passed its window check just before a stop landed.
        ctx.state
            .store()
            .transition_session(
                &session.id,
                &[SessionStatus::Active],
                SessionStatus::Completed,
                ctx.clock_now(),
            )
            .await
            .unwrap();
        let late = Attempt {
            id: "late-attempt".to_string(),
            session_id: session.id.clone(),
            student_id: STUDENT.to_string(),
            status: AttemptStatus::InProgress,
            answers: Json(session.paper_snapshot.0.blank_answers()),
            started_at: ctx.clock_now(),
            submitted_at: None,
            total_time_seconds: None,
            score_card: None,
            score_error: None,
            created_at: ctx.clock_now(),
            updated_at: ctx.clock_now(),
        };
        ctx.state.store().insert_attempt_if_absent(&late).await.unwrap();

        sessions::drain_open_attempts(&ctx.state, &session.id).await.unwrap();
        let stored = ctx.state.store().find_attempt("late-attempt").await.unwrap().unwrap();
        assert_eq!(stored.status, AttemptStatus::TimedOut);
        assert!(stored.score_card.is_some());
    }
}
