use thiserror::Error;

use crate::repositories::StoreError;

/// Typed outcomes the engine reports back to callers. Deadline and state errors are expected
/// traffic; only `Store` means something actually broke.
#[derive(Debug, Error)]
pub(crate) enum EngineError {
    #[error("{0}")]
    InvalidState(String),
    #[error("session {session_id} is not accepting attempts")]
    SessionNotActive { session_id: String },
    #[error("attempt {attempt_id} no longer accepts answers")]
    AttemptExpired { attempt_id: String },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    InvalidAnswer(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}
