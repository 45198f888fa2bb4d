//! Session lifecycle: draft -> active -> {completed, cancelled}.
//!
//! Stop, cancel and the deadline all close a session through [`close_session`], which drains
//! every still-open attempt through the submission gate as a forced timeout.

use std::collections::HashSet;

use sqlx::types::Json;
use time::Duration;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::db::models::{PaperSnapshot, TestSession};
use crate::db::types::{CloseReason, SessionStatus};
use crate::repositories::Activation;
use crate::services::errors::EngineError;
use crate::services::submission;

#[derive(Debug, Clone)]
pub(crate) struct NewSession {
    pub(crate) classroom_id: String,
    pub(crate) created_by: String,
    pub(crate) paper: PaperSnapshot,
    pub(crate) roster: Vec<String>,
}

/// Attempts sealed while draining a closed session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DrainSummary {
    pub(crate) forced: usize,
    pub(crate) already_sealed: usize,
    pub(crate) failed: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct ClosedSession {
    pub(crate) session: TestSession,
    pub(crate) drained: DrainSummary,
}

fn check_paper(paper: &PaperSnapshot) -> Result<(), EngineError> {
    if paper.questions.is_empty() {
        return Err(EngineError::InvalidInput("Paper must contain at least one question".into()));
    }

    let mut seen = HashSet::with_capacity(paper.questions.len());
    for question in &paper.questions {
        if question.id.trim().is_empty() {
            return Err(EngineError::InvalidInput("Question ids must not be empty".into()));
        }
        if !seen.insert(question.id.as_str()) {
            return Err(EngineError::InvalidInput(format!(
                "Question id {} appears more than once",
                question.id
            )));
        }
    }
    Ok(())
}

fn normalize_roster(roster: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    roster
        .into_iter()
        .map(|member| member.trim().to_string())
        .filter(|member| !member.is_empty() && seen.insert(member.clone()))
        .collect()
}

pub(crate) async fn create_session(
    state: &AppState,
    new: NewSession,
) -> Result<TestSession, EngineError> {
    check_paper(&new.paper)?;

    let now = state.clock().now();
    let session = TestSession {
        id: Uuid::new_v4().to_string(),
        classroom_id: new.classroom_id,
        created_by: new.created_by,
        paper_snapshot: Json(new.paper),
        roster: Json(normalize_roster(new.roster)),
        status: SessionStatus::Draft,
        duration_minutes: None,
        started_at: None,
        ends_at: None,
        closed_at: None,
        created_at: now,
        updated_at: now,
    };

    state.store().insert_session(&session).await?;
    tracing::info!(
        session_id = %session.id,
        classroom_id = %session.classroom_id,
        questions = session.paper_snapshot.questions.len(),
        roster = session.roster.len(),
        "Session created"
    );
    Ok(session)
}

pub(crate) async fn find_session(
    state: &AppState,
    session_id: &str,
) -> Result<TestSession, EngineError> {
    state.store().find_session(session_id).await?.ok_or(EngineError::NotFound("Session"))
}

/// Opens the time window. `ends_at` is computed here, once, and never moved afterwards.
pub(crate) async fn activate(
    state: &AppState,
    session_id: &str,
    duration_minutes: i64,
) -> Result<TestSession, EngineError> {
    let max = i64::from(state.settings().engine().max_session_duration_minutes);
    if !(1..=max).contains(&duration_minutes) {
        return Err(EngineError::InvalidInput(format!(
            "duration_minutes must be between 1 and {max}"
        )));
    }

    let session = find_session(state, session_id).await?;
    if session.status != SessionStatus::Draft {
        return Err(EngineError::InvalidState(format!(
            "Session is {}, only draft sessions can be started",
            session.status.as_str()
        )));
    }

    let minutes = i32::try_from(duration_minutes).map_err(|_| {
        EngineError::InvalidInput(format!("duration_minutes {duration_minutes} is out of range"))
    })?;

    let started_at = state.clock().now();
    let activation = Activation {
        duration_minutes: minutes,
        started_at,
        ends_at: started_at + Duration::minutes(duration_minutes),
    };

    let Some(session) = state.store().activate_session(session_id, activation).await? else {
        return Err(EngineError::InvalidState("Session was started concurrently".into()));
    };

    metrics::counter!("sessions_activated_total").increment(1);
    tracing::info!(
        session_id = %session.id,
        duration_minutes,
        ends_at = %activation.ends_at,
        "Session activated"
    );
    Ok(session)
}

/// Teacher "stop": an immediate deadline.
pub(crate) async fn force_complete(
    state: &AppState,
    session_id: &str,
) -> Result<ClosedSession, EngineError> {
    close_or_reject(state, session_id, CloseReason::Stopped).await
}

pub(crate) async fn cancel(
    state: &AppState,
    session_id: &str,
) -> Result<ClosedSession, EngineError> {
    close_or_reject(state, session_id, CloseReason::Cancelled).await
}

async fn close_or_reject(
    state: &AppState,
    session_id: &str,
    reason: CloseReason,
) -> Result<ClosedSession, EngineError> {
    if let Some(closed) = close_session(state, session_id, reason).await? {
        return Ok(closed);
    }

    let session = find_session(state, session_id).await?;
    Err(EngineError::InvalidState(format!(
        "Session is {}, it cannot be {}",
        session.status.as_str(),
        match reason {
            CloseReason::Cancelled => "cancelled",
            CloseReason::Deadline | CloseReason::Stopped => "stopped",
        }
    )))
}

fn closable_from(reason: CloseReason) -> &'static [SessionStatus] {
    match reason {
        CloseReason::Deadline | CloseReason::Stopped => &[SessionStatus::Active],
        CloseReason::Cancelled => &[SessionStatus::Draft, SessionStatus::Active],
    }
}

/// Moves the session into its terminal status and force-submits every open attempt. `None`
/// when the session was not in a status this reason may close (including a concurrent close
/// that got there first).
pub(crate) async fn close_session(
    state: &AppState,
    session_id: &str,
    reason: CloseReason,
) -> Result<Option<ClosedSession>, EngineError> {
    let now = state.clock().now();
    let Some(session) = state
        .store()
        .transition_session(session_id, closable_from(reason), reason.target_status(), now)
        .await?
    else {
        return Ok(None);
    };

    metrics::counter!("sessions_closed_total", "reason" => reason.as_str()).increment(1);
    tracing::info!(
        session_id = %session.id,
        reason = reason.as_str(),
        status = session.status.as_str(),
        "Session closed"
    );

    let drained = drain_open_attempts(state, &session.id).await?;
    Ok(Some(ClosedSession { session, drained }))
}

/// Force-submits every in-progress attempt of a session. One failing attempt never stops the
/// others from being sealed.
pub(crate) async fn drain_open_attempts(
    state: &AppState,
    session_id: &str,
) -> Result<DrainSummary, EngineError> {
    let open = state.store().list_open_attempt_ids(session_id).await?;
    let mut summary = DrainSummary::default();

    for attempt_id in open {
        match submission::force_timeout(state, &attempt_id).await {
            Ok(receipt) if receipt.accepted => summary.forced += 1,
            Ok(_) => summary.already_sealed += 1,
            Err(err) => {
                summary.failed += 1;
                tracing::error!(
                    session_id,
                    attempt_id = %attempt_id,
                    error = %err,
                    "Failed to force-submit attempt"
                );
            }
        }
    }

    if summary != DrainSummary::default() {
        tracing::info!(
            session_id,
            forced = summary.forced,
            already_sealed = summary.already_sealed,
            failed = summary.failed,
            "Drained open attempts"
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::db::types::AttemptStatus;
    use crate::services::attempts;
    use crate::test_support::{self, STUDENT, STUDENT_2, TEACHER};

    #[tokio::test]
    async fn create_rejects_malformed_papers() {
        let ctx = test_support::setup_engine().await;

        let mut empty = test_support::ten_question_paper();
        empty.questions.clear();
        let err = create_session(&ctx.state, ctx.new_session(empty)).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        let mut duplicated = test_support::ten_question_paper();
        duplicated.questions[3].id = "q01".to_string();
        let err = create_session(&ctx.state, ctx.new_session(duplicated)).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn create_freezes_paper_and_dedupes_roster() {
        let ctx = test_support::setup_engine().await;
        let mut paper = test_support::ten_question_paper();
        let mut new = ctx.new_session(paper.clone());
        new.roster = vec![STUDENT.into(), " ".into(), STUDENT.into(), STUDENT_2.into()];

        let session = create_session(&ctx.state, new).await.unwrap();
        paper.questions[0].correct_index = Some(3);

        let stored = find_session(&ctx.state, &session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Draft);
        assert_eq!(stored.created_by, TEACHER);
        assert_eq!(stored.roster.0, vec![STUDENT.to_string(), STUDENT_2.to_string()]);
        assert_eq!(stored.paper_snapshot.questions[0].correct_index, Some(1));
        assert!(stored.ends_at.is_none());
    }

    #[tokio::test]
    async fn activate_sets_window_once() {
        let ctx = test_support::setup_engine().await;
        let draft = ctx.draft_session().await;

        let active = activate(&ctx.state, &draft.id, 30).await.unwrap();
        assert_eq!(active.status, SessionStatus::Active);
        assert_eq!(active.started_at, Some(ctx.clock_now()));
        assert_eq!(active.ends_at, Some(ctx.clock_now() + Duration::minutes(30)));

        ctx.clock.advance(Duration::minutes(1));
        let err = activate(&ctx.state, &draft.id, 90).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let stored = find_session(&ctx.state, &draft.id).await.unwrap();
        assert_eq!(stored.ends_at, active.ends_at);
        assert_eq!(stored.duration_minutes, Some(30));
    }

    #[tokio::test]
    async fn activate_rejects_out_of_range_durations() {
        let ctx = test_support::setup_engine().await;
        let draft = ctx.draft_session().await;

        for minutes in [0, -5, 601] {
            let err = activate(&ctx.state, &draft.id, minutes).await.unwrap_err();
            assert!(matches!(err, EngineError::InvalidInput(_)), "{minutes}");
        }
        assert_eq!(find_session(&ctx.state, &draft.id).await.unwrap().status, SessionStatus::Draft);
    }

    #[tokio::test]
    async fn cancel_is_allowed_from_draft_and_active_only() {
        let ctx = test_support::setup_engine().await;

        let draft = ctx.draft_session().await;
        let closed = cancel(&ctx.state, &draft.id).await.unwrap();
        assert_eq!(closed.session.status, SessionStatus::Cancelled);
        assert_eq!(closed.session.closed_at, Some(ctx.clock_now()));

        let err = cancel(&ctx.state, &draft.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        let err = activate(&ctx.state, &draft.id, 30).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let active = ctx.active_session(30).await;
        force_complete(&ctx.state, &active.id).await.unwrap();
        let err = cancel(&ctx.state, &active.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn stop_requires_an_active_session() {
        let ctx = test_support::setup_engine().await;
        let draft = ctx.draft_session().await;

        let err = force_complete(&ctx.state, &draft.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let err = force_complete(&ctx.state, "missing").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound("Session")));
    }

    #[tokio::test]
    async fn stop_times_out_open_attempts_with_their_buffers() {
        let ctx = test_support::setup_engine().await;
        let session = ctx.active_session(30).await;

        let (open, _) = attempts::get_or_create_attempt(&ctx.state, &session.id, STUDENT).await.unwrap();
        attempts::record_answer(&ctx.state, STUDENT, &open.id, "q01", Some(1)).await.unwrap();
        attempts::record_answer(&ctx.state, STUDENT, &open.id, "q02", Some(0)).await.unwrap();

        let (done, _) =
            attempts::get_or_create_attempt(&ctx.state, &session.id, STUDENT_2).await.unwrap();
        submission::submit_for_student(&ctx.state, STUDENT_2, &done.id, None).await.unwrap();

        ctx.clock.advance(Duration::minutes(12));
        let closed = force_complete(&ctx.state, &session.id).await.unwrap();
        assert_eq!(closed.session.status, SessionStatus::Completed);
        assert_eq!(closed.drained, DrainSummary { forced: 1, already_sealed: 0, failed: 0 });

        let sealed = ctx.state.store().find_attempt(&open.id).await.unwrap().unwrap();
        assert_eq!(sealed.status, AttemptStatus::TimedOut);
        assert_eq!(sealed.total_time_seconds, Some(12 * 60));
        let card = sealed.score_card.expect("score card").0;
        assert_eq!(card.correct_answers, 1);
        assert_eq!(card.wrong_answers, 1);
        assert_eq!(card.skipped, 8);

        let untouched = ctx.state.store().find_attempt(&done.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, AttemptStatus::Submitted);
    }

    #[tokio::test]
    async fn cancel_drains_through_the_same_path() {
        let ctx = test_support::setup_engine().await;
        let session = ctx.active_session(30).await;
        let (open, _) = attempts::get_or_create_attempt(&ctx.state, &session.id, STUDENT).await.unwrap();

        let closed = cancel(&ctx.state, &session.id).await.unwrap();
        assert_eq!(closed.session.status, SessionStatus::Cancelled);
        assert_eq!(closed.drained.forced, 1);

        let sealed = ctx.state.store().find_attempt(&open.id).await.unwrap().unwrap();
        assert_eq!(sealed.status, AttemptStatus::TimedOut);
    }

    #[tokio::test]
    async fn broken_paper_fails_scoring_for_that_attempt_only() {
        let ctx = test_support::setup_engine().await;
        let mut paper = test_support::ten_question_paper();
        paper.questions[9].correct_index = Some(9);
        let session = create_session(&ctx.state, ctx.new_session(paper)).await.unwrap();
        activate(&ctx.state, &session.id, 30).await.unwrap();

        let (first, _) = attempts::get_or_create_attempt(&ctx.state, &session.id, STUDENT).await.unwrap();
        let (second, _) =
            attempts::get_or_create_attempt(&ctx.state, &session.id, STUDENT_2).await.unwrap();

        let closed = force_complete(&ctx.state, &session.id).await.unwrap();
        assert_eq!(closed.drained.forced, 2);

        for id in [&first.id, &second.id] {
            let sealed = ctx.state.store().find_attempt(id).await.unwrap().unwrap();
            assert_eq!(sealed.status, AttemptStatus::TimedOut);
            assert!(sealed.score_card.is_none());
            assert!(sealed.score_error.as_deref().unwrap().contains("q10"));
        }
    }
}
