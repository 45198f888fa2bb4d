use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{AttemptStatus, DifficultyLevel, QuestionKind, SessionStatus};
use crate::services::scoring::ScoreCard;

/// Selected option per question id; `None` means unanswered.
pub(crate) type AnswerSheet = BTreeMap<String, Option<u32>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) prompt: String,
    #[serde(default)]
    pub(crate) options: Vec<String>,
    #[serde(default)]
    pub(crate) correct_index: Option<u32>,
    pub(crate) chapter: String,
    pub(crate) difficulty: DifficultyLevel,
    pub(crate) kind: QuestionKind,
}

/// Frozen copy of a question paper, taken when the session is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PaperSnapshot {
    pub(crate) paper_id: String,
    pub(crate) title: String,
    pub(crate) subject: String,
    pub(crate) questions: Vec<Question>,
}

impl PaperSnapshot {
    pub(crate) fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|question| question.id == question_id)
    }

    pub(crate) fn blank_answers(&self) -> AnswerSheet {
        self.questions.iter().map(|question| (question.id.clone(), None)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct TestSession {
    pub(crate) id: String,
    pub(crate) classroom_id: String,
    pub(crate) created_by: String,
    pub(crate) paper_snapshot: Json<PaperSnapshot>,
    pub(crate) roster: Json<Vec<String>>,
    pub(crate) status: SessionStatus,
    pub(crate) duration_minutes: Option<i32>,
    pub(crate) started_at: Option<PrimitiveDateTime>,
    pub(crate) ends_at: Option<PrimitiveDateTime>,
    pub(crate) closed_at: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

impl TestSession {
    /// Accepting work: active and strictly before `ends_at`.
    pub(crate) fn is_open_at(&self, now: PrimitiveDateTime) -> bool {
        self.status == SessionStatus::Active && self.ends_at.is_some_and(|ends_at| now < ends_at)
    }

    pub(crate) fn is_expired_at(&self, now: PrimitiveDateTime) -> bool {
        self.status == SessionStatus::Active && self.ends_at.is_some_and(|ends_at| now >= ends_at)
    }

    pub(crate) fn allotted_seconds(&self) -> i64 {
        self.duration_minutes.map(|minutes| i64::from(minutes) * 60).unwrap_or(0)
    }

    pub(crate) fn is_on_roster(&self, student_id: &str) -> bool {
        self.roster.0.iter().any(|member| member == student_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Attempt {
    pub(crate) id: String,
    pub(crate) session_id: String,
    pub(crate) student_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) answers: Json<AnswerSheet>,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) total_time_seconds: Option<i64>,
    pub(crate) score_card: Option<Json<ScoreCard>>,
    pub(crate) score_error: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

impl Attempt {
    pub(crate) fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
