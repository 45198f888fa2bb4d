//! Read side for dashboards: live status, session results and per-attempt review.

use std::collections::HashMap;

use serde::Serialize;
use time::PrimitiveDateTime;

use crate::core::state::AppState;
use crate::core::time::{format_primitive, seconds_between};
use crate::db::models::{Attempt, TestSession};
use crate::db::types::{AttemptStatus, DifficultyLevel, QuestionKind, SessionStatus};
use crate::services::errors::EngineError;
use crate::services::scoring::{round2, ScoreCard};

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RecentSubmission {
    pub(crate) attempt_id: String,
    pub(crate) student_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) submitted_at: String,
    pub(crate) score: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct LiveStatus {
    pub(crate) session_id: String,
    pub(crate) status: SessionStatus,
    pub(crate) roster_size: usize,
    pub(crate) not_started: usize,
    pub(crate) in_progress: usize,
    pub(crate) submitted: usize,
    pub(crate) timed_out: usize,
    pub(crate) ends_at: Option<String>,
    pub(crate) time_remaining_seconds: Option<i64>,
    pub(crate) recent_submissions: Vec<RecentSubmission>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ResultRow {
    pub(crate) student_id: String,
    pub(crate) attempt_id: Option<String>,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: Option<String>,
    pub(crate) submitted_at: Option<String>,
    pub(crate) total_time_seconds: Option<i64>,
    pub(crate) score_card: Option<ScoreCard>,
    pub(crate) score_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct ResultAggregate {
    pub(crate) scored_count: usize,
    pub(crate) average_score: Option<f64>,
    pub(crate) highest_score: Option<u32>,
    pub(crate) lowest_score: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SessionResults {
    pub(crate) session_id: String,
    pub(crate) status: SessionStatus,
    pub(crate) title: String,
    pub(crate) subject: String,
    pub(crate) rows: Vec<ResultRow>,
    pub(crate) aggregate: ResultAggregate,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct QuestionReview {
    pub(crate) question_id: String,
    pub(crate) prompt: String,
    pub(crate) options: Vec<String>,
    pub(crate) chapter: String,
    pub(crate) difficulty: DifficultyLevel,
    pub(crate) kind: QuestionKind,
    pub(crate) selected_index: Option<u32>,
    /// Revealed once the attempt is terminal.
    pub(crate) correct_index: Option<u32>,
    pub(crate) is_correct: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AttemptDetail {
    pub(crate) attempt_id: String,
    pub(crate) session_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: String,
    pub(crate) submitted_at: Option<String>,
    pub(crate) ends_at: Option<String>,
    pub(crate) total_time_seconds: Option<i64>,
    pub(crate) score_card: Option<ScoreCard>,
    pub(crate) score_error: Option<String>,
    pub(crate) questions: Vec<QuestionReview>,
}

pub(crate) async fn live_status(
    state: &AppState,
    session: &TestSession,
) -> Result<LiveStatus, EngineError> {
    let attempts = state.store().list_attempts(&session.id).await?;
    let now = state.clock().now();
    let limit = state.settings().engine().live_status_recent_limit;
    Ok(build_live_status(session, &attempts, now, limit))
}

pub(crate) fn build_live_status(
    session: &TestSession,
    attempts: &[Attempt],
    now: PrimitiveDateTime,
    recent_limit: usize,
) -> LiveStatus {
    let count = |status: AttemptStatus| attempts.iter().filter(|a| a.status == status).count();
    let roster_size = session.roster.len();
    let on_roster = attempts.iter().filter(|a| session.is_on_roster(&a.student_id)).count();

    let time_remaining_seconds = match session.status {
        SessionStatus::Draft => None,
        SessionStatus::Active => session.ends_at.map(|ends_at| seconds_between(now, ends_at).max(0)),
        SessionStatus::Completed | SessionStatus::Cancelled => Some(0),
    };

    let mut sealed: Vec<&Attempt> =
        attempts.iter().filter(|attempt| attempt.submitted_at.is_some()).collect();
    sealed.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then_with(|| a.id.cmp(&b.id)));

    let recent_submissions = sealed
        .into_iter()
        .take(recent_limit)
        .filter_map(|attempt| {
            Some(RecentSubmission {
                attempt_id: attempt.id.clone(),
                student_id: attempt.student_id.clone(),
                status: attempt.status,
                submitted_at: format_primitive(attempt.submitted_at?),
                score: attempt.score_card.as_ref().map(|card| card.0.score),
            })
        })
        .collect();

    LiveStatus {
        session_id: session.id.clone(),
        status: session.status,
        roster_size,
        not_started: roster_size.saturating_sub(on_roster),
        in_progress: count(AttemptStatus::InProgress),
        submitted: count(AttemptStatus::Submitted),
        timed_out: count(AttemptStatus::TimedOut),
        ends_at: session.ends_at.map(format_primitive),
        time_remaining_seconds,
        recent_submissions,
    }
}

pub(crate) async fn session_results(
    state: &AppState,
    session: &TestSession,
) -> Result<SessionResults, EngineError> {
    let attempts = state.store().list_attempts(&session.id).await?;
    Ok(build_results(session, attempts))
}

pub(crate) fn build_results(session: &TestSession, attempts: Vec<Attempt>) -> SessionResults {
    let mut by_student: HashMap<String, Attempt> =
        attempts.into_iter().map(|attempt| (attempt.student_id.clone(), attempt)).collect();

    let mut rows: Vec<ResultRow> = session
        .roster
        .iter()
        .map(|student_id| match by_student.remove(student_id) {
            Some(attempt) => result_row(attempt),
            None => ResultRow {
                student_id: student_id.clone(),
                attempt_id: None,
                status: AttemptStatus::NotStarted,
                started_at: None,
                submitted_at: None,
                total_time_seconds: None,
                score_card: None,
                score_error: None,
            },
        })
        .collect();

    let mut strays: Vec<Attempt> = by_student.into_values().collect();
    strays.sort_by(|a, b| a.student_id.cmp(&b.student_id));
    rows.extend(strays.into_iter().map(result_row));

    let scores: Vec<u32> =
        rows.iter().filter_map(|row| row.score_card.as_ref().map(|card| card.score)).collect();
    let aggregate = if scores.is_empty() {
        ResultAggregate::default()
    } else {
        let sum: u64 = scores.iter().map(|score| u64::from(*score)).sum();
        ResultAggregate {
            scored_count: scores.len(),
            average_score: Some(round2(sum as f64 / scores.len() as f64)),
            highest_score: scores.iter().max().copied(),
            lowest_score: scores.iter().min().copied(),
        }
    };

    SessionResults {
        session_id: session.id.clone(),
        status: session.status,
        title: session.paper_snapshot.title.clone(),
        subject: session.paper_snapshot.subject.clone(),
        rows,
        aggregate,
    }
}

fn result_row(attempt: Attempt) -> ResultRow {
    ResultRow {
        student_id: attempt.student_id,
        attempt_id: Some(attempt.id),
        status: attempt.status,
        started_at: Some(format_primitive(attempt.started_at)),
        submitted_at: attempt.submitted_at.map(format_primitive),
        total_time_seconds: attempt.total_time_seconds,
        score_card: attempt.score_card.map(|card| card.0),
        score_error: attempt.score_error,
    }
}

/// Per-question review for the attempt's owner.
pub(crate) async fn attempt_detail(
    state: &AppState,
    student_id: &str,
    attempt_id: &str,
) -> Result<AttemptDetail, EngineError> {
    let attempt =
        state.store().find_attempt(attempt_id).await?.ok_or(EngineError::NotFound("Attempt"))?;
    if attempt.student_id != student_id {
        return Err(EngineError::Forbidden("Attempt belongs to another student"));
    }

    let session = state
        .store()
        .find_session(&attempt.session_id)
        .await?
        .ok_or(EngineError::NotFound("Session"))?;

    Ok(build_attempt_detail(&session, attempt))
}

pub(crate) fn build_attempt_detail(session: &TestSession, attempt: Attempt) -> AttemptDetail {
    let reveal = attempt.is_terminal();
    let questions = session
        .paper_snapshot
        .questions
        .iter()
        .map(|question| {
            let selected_index = attempt.answers.get(&question.id).copied().flatten();
            let correct_index = if reveal { question.correct_index } else { None };
            let is_correct = match (question.kind, selected_index, correct_index) {
                (QuestionKind::Objective, Some(selected), Some(correct)) => {
                    Some(selected == correct)
                }
                _ => None,
            };
            QuestionReview {
                question_id: question.id.clone(),
                prompt: question.prompt.clone(),
                options: question.options.clone(),
                chapter: question.chapter.clone(),
                difficulty: question.difficulty,
                kind: question.kind,
                selected_index,
                correct_index,
                is_correct,
            }
        })
        .collect();

    AttemptDetail {
        attempt_id: attempt.id,
        session_id: attempt.session_id,
        status: attempt.status,
        started_at: format_primitive(attempt.started_at),
        submitted_at: attempt.submitted_at.map(format_primitive),
        ends_at: session.ends_at.map(format_primitive),
        total_time_seconds: attempt.total_time_seconds,
        score_card: attempt.score_card.map(|card| card.0),
        score_error: attempt.score_error,
        questions,
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::services::{attempts, sessions, submission};
    use crate::test_support::{self, STUDENT, STUDENT_2, STUDENT_3};

    #[tokio::test]
    async fn live_status_counts_roster_states() {
        let ctx = test_support::setup_engine().await;
        let session = ctx.active_session(30).await;

        let (first, _) = attempts::get_or_create_attempt(&ctx.state, &session.id, STUDENT).await.unwrap();
        attempts::get_or_create_attempt(&ctx.state, &session.id, STUDENT_2).await.unwrap();
        ctx.clock.advance(Duration::minutes(10));
        submission::submit_for_student(&ctx.state, STUDENT, &first.id, None).await.unwrap();

        let status = live_status(&ctx.state, &session).await.unwrap();
        assert_eq!(status.roster_size, 3);
        assert_eq!(status.not_started, 1);
        assert_eq!(status.in_progress, 1);
        assert_eq!(status.submitted, 1);
        assert_eq!(status.timed_out, 0);
        assert_eq!(status.time_remaining_seconds, Some(20 * 60));
        assert_eq!(status.recent_submissions.len(), 1);
        assert_eq!(status.recent_submissions[0].student_id, STUDENT);
        assert_eq!(status.recent_submissions[0].score, Some(0));

        ctx.clock.advance(Duration::minutes(45));
        let status = live_status(&ctx.state, &session).await.unwrap();
        assert_eq!(status.time_remaining_seconds, Some(0));
    }

    #[tokio::test]
    async fn recent_submissions_are_newest_first_and_bounded() {
        let ctx = test_support::setup_engine().await;
        let session = ctx.active_session(30).await;

        for student in [STUDENT, STUDENT_2, STUDENT_3] {
            let (attempt, _) =
                attempts::get_or_create_attempt(&ctx.state, &session.id, student).await.unwrap();
            ctx.clock.advance(Duration::minutes(1));
            submission::submit_for_student(&ctx.state, student, &attempt.id, None).await.unwrap();
        }

        let attempts = ctx.state.store().list_attempts(&session.id).await.unwrap();
        let status = build_live_status(&session, &attempts, ctx.clock_now(), 2);
        let order: Vec<&str> =
            status.recent_submissions.iter().map(|row| row.student_id.as_str()).collect();
        assert_eq!(order, vec![STUDENT_3, STUDENT_2]);
    }

    #[tokio::test]
    async fn results_cover_every_roster_student_with_aggregates() {
        let ctx = test_support::setup_engine().await;
        let session = ctx.active_session(30).await;

        let (first, _) = attempts::get_or_create_attempt(&ctx.state, &session.id, STUDENT).await.unwrap();
        for question in ["q01", "q02", "q03", "q04", "q05", "q06"] {
            attempts::record_answer(&ctx.state, STUDENT, &first.id, question, Some(1)).await.unwrap();
        }
        submission::submit_for_student(&ctx.state, STUDENT, &first.id, None).await.unwrap();

        let (second, _) =
            attempts::get_or_create_attempt(&ctx.state, &session.id, STUDENT_2).await.unwrap();
        attempts::record_answer(&ctx.state, STUDENT_2, &second.id, "q01", Some(1)).await.unwrap();
        sessions::force_complete(&ctx.state, &session.id).await.unwrap();

        let session = sessions::find_session(&ctx.state, &session.id).await.unwrap();
        let results = session_results(&ctx.state, &session).await.unwrap();

        assert_eq!(results.rows.len(), 3);
        assert_eq!(results.rows[0].status, AttemptStatus::Submitted);
        assert_eq!(results.rows[1].status, AttemptStatus::TimedOut);
        assert_eq!(results.rows[2].status, AttemptStatus::NotStarted);
        assert!(results.rows[2].attempt_id.is_none());
        assert_eq!(
            results.aggregate,
            ResultAggregate {
                scored_count: 2,
                average_score: Some(35.0),
                highest_score: Some(60),
                lowest_score: Some(10),
            }
        );
    }

    #[tokio::test]
    async fn attempt_detail_reveals_answers_only_after_sealing() {
        let ctx = test_support::setup_engine().await;
        let session = ctx.active_session(30).await;
        let (attempt, _) = attempts::get_or_create_attempt(&ctx.state, &session.id, STUDENT).await.unwrap();
        attempts::record_answer(&ctx.state, STUDENT, &attempt.id, "q01", Some(2)).await.unwrap();

        let detail = attempt_detail(&ctx.state, STUDENT, &attempt.id).await.unwrap();
        assert_eq!(detail.questions.len(), 10);
        assert_eq!(detail.questions[0].selected_index, Some(2));
        assert!(detail.questions.iter().all(|q| q.correct_index.is_none()));
        assert!(detail.score_card.is_none());

        let err = attempt_detail(&ctx.state, STUDENT_2, &attempt.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        submission::submit_for_student(&ctx.state, STUDENT, &attempt.id, None).await.unwrap();
        let detail = attempt_detail(&ctx.state, STUDENT, &attempt.id).await.unwrap();
        assert_eq!(detail.questions[0].correct_index, Some(1));
        assert_eq!(detail.questions[0].is_correct, Some(false));
        assert_eq!(detail.questions[1].is_correct, None);
        assert_eq!(detail.score_card.unwrap().wrong_answers, 1);
    }
}
