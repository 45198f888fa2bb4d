//! Submission gate. Every terminal transition of an attempt, whether the student pressed
//! submit or the deadline enforcer forced it, goes through [`submit`].

use sqlx::types::Json;
use time::PrimitiveDateTime;

use crate::core::state::AppState;
use crate::core::time::seconds_between;
use crate::db::models::{AnswerSheet, Attempt, PaperSnapshot, TestSession};
use crate::db::types::AttemptStatus;
use crate::repositories::SealOutcome;
use crate::services::attempts::validate_selection;
use crate::services::errors::EngineError;
use crate::services::scoring::{score_attempt, ScoreCard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TerminalStatus {
    Submitted,
    TimedOut,
}

impl TerminalStatus {
    fn attempt_status(self) -> AttemptStatus {
        match self {
            TerminalStatus::Submitted => AttemptStatus::Submitted,
            TerminalStatus::TimedOut => AttemptStatus::TimedOut,
        }
    }
}

/// Result of a submit call. `accepted` is false when another caller had already sealed the
/// attempt; `attempt` is the stored terminal row either way.
#[derive(Debug, Clone)]
pub(crate) struct SubmissionReceipt {
    pub(crate) attempt: Attempt,
    pub(crate) accepted: bool,
}

pub(crate) async fn submit(
    state: &AppState,
    attempt_id: &str,
    final_answers: Option<AnswerSheet>,
    requested: TerminalStatus,
) -> Result<SubmissionReceipt, EngineError> {
    let attempt =
        state.store().find_attempt(attempt_id).await?.ok_or(EngineError::NotFound("Attempt"))?;

    if attempt.is_terminal() {
        return Ok(SubmissionReceipt { attempt, accepted: false });
    }

    let session = state
        .store()
        .find_session(&attempt.session_id)
        .await?
        .ok_or(EngineError::NotFound("Session"))?;

    let now = state.clock().now();
    let (status, overlay) = match requested {
        TerminalStatus::Submitted if session.is_open_at(now) => {
            if let Some(answers) = &final_answers {
                for (question_id, selection) in answers {
                    validate_selection(&session.paper_snapshot.0, question_id, *selection)?;
                }
            }
            (TerminalStatus::Submitted, final_answers)
        }
        TerminalStatus::Submitted => {
            tracing::info!(
                attempt_id,
                session_id = %session.id,
                student_id = %attempt.student_id,
                "Late submission converted into a forced timeout"
            );
            (TerminalStatus::TimedOut, None)
        }
        TerminalStatus::TimedOut => (TerminalStatus::TimedOut, None),
    };

    let mistake_cap = state.settings().engine().mistake_examples_per_chapter;
    let seal = |current: &Attempt| {
        seal_attempt(current, &session, overlay.as_ref(), status, now, mistake_cap)
    };

    let outcome = state
        .store()
        .seal_attempt(attempt_id, &seal)
        .await?
        .ok_or(EngineError::NotFound("Attempt"))?;

    match outcome {
        SealOutcome::Sealed(attempt) => {
            record_sealed(&attempt);
            Ok(SubmissionReceipt { attempt, accepted: true })
        }
        SealOutcome::AlreadySealed(attempt) => {
            tracing::debug!(attempt_id, status = attempt.status.as_str(), "Attempt already sealed");
            Ok(SubmissionReceipt { attempt, accepted: false })
        }
    }
}

/// Forced path used by the deadline enforcer and by stop/cancel.
pub(crate) async fn force_timeout(
    state: &AppState,
    attempt_id: &str,
) -> Result<SubmissionReceipt, EngineError> {
    submit(state, attempt_id, None, TerminalStatus::TimedOut).await
}

/// Student-facing submit: only the attempt's owner may seal it.
pub(crate) async fn submit_for_student(
    state: &AppState,
    student_id: &str,
    attempt_id: &str,
    final_answers: Option<AnswerSheet>,
) -> Result<SubmissionReceipt, EngineError> {
    let attempt =
        state.store().find_attempt(attempt_id).await?.ok_or(EngineError::NotFound("Attempt"))?;
    if attempt.student_id != student_id {
        return Err(EngineError::Forbidden("Attempt belongs to another student"));
    }

    submit(state, attempt_id, final_answers, TerminalStatus::Submitted).await
}

/// Builds the frozen, scored form of `current`. Runs under the store's exclusive hold.
fn seal_attempt(
    current: &Attempt,
    session: &TestSession,
    overlay: Option<&AnswerSheet>,
    status: TerminalStatus,
    now: PrimitiveDateTime,
    mistake_cap: usize,
) -> Attempt {
    let mut sealed = current.clone();
    if let Some(overlay) = overlay {
        for (question_id, selection) in overlay {
            sealed.answers.0.insert(question_id.clone(), *selection);
        }
    }

    let elapsed = seconds_between(current.started_at, now).clamp(0, session.allotted_seconds());

    sealed.status = status.attempt_status();
    sealed.submitted_at = Some(now);
    sealed.total_time_seconds = Some(elapsed);
    sealed.updated_at = now;

    let (card, error) = score(&session.paper_snapshot.0, &sealed.answers.0, elapsed, mistake_cap);
    sealed.score_card = card.map(Json);
    sealed.score_error = error;
    sealed
}

fn score(
    paper: &PaperSnapshot,
    answers: &AnswerSheet,
    elapsed: i64,
    mistake_cap: usize,
) -> (Option<ScoreCard>, Option<String>) {
    match score_attempt(paper, answers, elapsed, mistake_cap) {
        Ok(card) => (Some(card), None),
        Err(err) => (None, Some(err.to_string())),
    }
}

fn record_sealed(attempt: &Attempt) {
    metrics::counter!("attempts_sealed_total", "status" => attempt.status.as_str()).increment(1);

    match (&attempt.score_card, &attempt.score_error) {
        (Some(card), _) => tracing::info!(
            attempt_id = %attempt.id,
            session_id = %attempt.session_id,
            student_id = %attempt.student_id,
            status = attempt.status.as_str(),
            score = card.0.score,
            "Attempt sealed"
        ),
        (None, error) => {
            metrics::counter!("scoring_failures_total").increment(1);
            tracing::error!(
                attempt_id = %attempt.id,
                session_id = %attempt.session_id,
                status = attempt.status.as_str(),
                error = error.as_deref().unwrap_or("unknown"),
                "Attempt sealed without a score card"
            );
        }
    }
}
