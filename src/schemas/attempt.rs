use serde::{Deserialize, Serialize};

use crate::core::time::format_primitive;
use crate::db::models::AnswerSheet;
use crate::services::attempts::RecordedAnswer;
use crate::services::reporting::AttemptDetail;

#[derive(Debug, Deserialize)]
pub(crate) struct AnswerUpdate {
    /// `null` clears the answer.
    pub(crate) selected_index: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AttemptSubmit {
    #[serde(default)]
    pub(crate) answers: Option<AnswerSheet>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerRecordedResponse {
    pub(crate) attempt_id: String,
    pub(crate) question_id: String,
    pub(crate) selected_index: Option<u32>,
    pub(crate) recorded_at: String,
}

impl From<RecordedAnswer> for AnswerRecordedResponse {
    fn from(answer: RecordedAnswer) -> Self {
        Self {
            attempt_id: answer.attempt_id,
            question_id: answer.question_id,
            selected_index: answer.selected_index,
            recorded_at: format_primitive(answer.recorded_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptBeginResponse {
    pub(crate) created: bool,
    #[serde(flatten)]
    pub(crate) attempt: AttemptDetail,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmissionResponse {
    /// False when the attempt had already been sealed; `attempt` is the stored result.
    pub(crate) accepted: bool,
    pub(crate) attempt: AttemptDetail,
}
