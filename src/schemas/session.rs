use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::{PaperSnapshot, Question, TestSession};
use crate::db::types::{DifficultyLevel, QuestionKind, SessionStatus};
use crate::services::sessions::{ClosedSession, NewSession};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct QuestionInput {
    #[validate(length(min = 1, message = "question id must not be empty"))]
    pub(crate) id: String,
    #[validate(length(min = 1, message = "prompt must not be empty"))]
    pub(crate) prompt: String,
    #[serde(default)]
    pub(crate) options: Vec<String>,
    #[serde(default)]
    pub(crate) correct_index: Option<u32>,
    #[validate(length(min = 1, message = "chapter must not be empty"))]
    pub(crate) chapter: String,
    pub(crate) difficulty: DifficultyLevel,
    pub(crate) kind: QuestionKind,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct PaperInput {
    #[validate(length(min = 1, message = "paper_id must not be empty"))]
    pub(crate) paper_id: String,
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub(crate) title: String,
    #[validate(length(min = 1, message = "subject must not be empty"))]
    pub(crate) subject: String,
    #[validate(nested)]
    pub(crate) questions: Vec<QuestionInput>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SessionCreate {
    #[validate(length(min = 1, message = "classroom_id must not be empty"))]
    pub(crate) classroom_id: String,
    #[validate(nested)]
    pub(crate) paper: PaperInput,
    #[serde(default)]
    pub(crate) roster: Vec<String>,
}

impl SessionCreate {
    pub(crate) fn into_new_session(self, created_by: &str) -> NewSession {
        let paper = PaperSnapshot {
            paper_id: self.paper.paper_id,
            title: self.paper.title,
            subject: self.paper.subject,
            questions: self
                .paper
                .questions
                .into_iter()
                .map(|question| Question {
                    id: question.id.trim().to_string(),
                    prompt: question.prompt,
                    options: question.options,
                    correct_index: question.correct_index,
                    chapter: question.chapter,
                    difficulty: question.difficulty,
                    kind: question.kind,
                })
                .collect(),
        };

        NewSession {
            classroom_id: self.classroom_id,
            created_by: created_by.to_string(),
            paper,
            roster: self.roster,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SessionStart {
    #[validate(range(min = 1, message = "duration_minutes must be positive"))]
    pub(crate) duration_minutes: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionResponse {
    pub(crate) id: String,
    pub(crate) classroom_id: String,
    pub(crate) created_by: String,
    pub(crate) paper_id: String,
    pub(crate) title: String,
    pub(crate) subject: String,
    pub(crate) question_count: usize,
    pub(crate) roster: Vec<String>,
    pub(crate) status: SessionStatus,
    pub(crate) duration_minutes: Option<i32>,
    pub(crate) started_at: Option<String>,
    pub(crate) ends_at: Option<String>,
    pub(crate) closed_at: Option<String>,
    pub(crate) created_at: String,
}

impl From<TestSession> for SessionResponse {
    fn from(session: TestSession) -> Self {
        let paper = session.paper_snapshot.0;
        Self {
            id: session.id,
            classroom_id: session.classroom_id,
            created_by: session.created_by,
            paper_id: paper.paper_id,
            title: paper.title,
            subject: paper.subject,
            question_count: paper.questions.len(),
            roster: session.roster.0,
            status: session.status,
            duration_minutes: session.duration_minutes,
            started_at: session.started_at.map(format_primitive),
            ends_at: session.ends_at.map(format_primitive),
            closed_at: session.closed_at.map(format_primitive),
            created_at: format_primitive(session.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionClosedResponse {
    pub(crate) session: SessionResponse,
    pub(crate) forced_submissions: usize,
    pub(crate) already_sealed: usize,
    pub(crate) failed_submissions: usize,
}

impl From<ClosedSession> for SessionClosedResponse {
    fn from(closed: ClosedSession) -> Self {
        Self {
            session: closed.session.into(),
            forced_submissions: closed.drained.forced,
            already_sealed: closed.drained.already_sealed,
            failed_submissions: closed.drained.failed,
        }
    }
}
