//! Durable state of the engine: sessions and attempts.
//!
//! Every mutation that can race is expressed as a conditional transition so that the
//! backend, not the caller, decides who wins.

pub(crate) mod memory;
pub(crate) mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::{Attempt, TestSession};
use crate::db::types::SessionStatus;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Activation {
    pub(crate) duration_minutes: i32,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) ends_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SessionFilter {
    pub(crate) created_by: Option<String>,
    pub(crate) classroom_id: Option<String>,
    pub(crate) subject: Option<String>,
}

#[derive(Debug)]
pub(crate) enum SealOutcome {
    /// This call moved the attempt out of `in_progress`.
    Sealed(Attempt),
    /// Somebody else already did; the stored row is returned untouched.
    AlreadySealed(Attempt),
}

impl SealOutcome {
    pub(crate) fn attempt(&self) -> &Attempt {
        match self {
            SealOutcome::Sealed(attempt) | SealOutcome::AlreadySealed(attempt) => attempt,
        }
    }
}

/// Builds the terminal form of an in-progress attempt. Runs while the backend holds the
/// attempt exclusively, so it must not block.
pub(crate) type SealFn<'a> = &'a (dyn Fn(&Attempt) -> Attempt + Send + Sync);

#[async_trait]
pub(crate) trait EngineStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn insert_session(&self, session: &TestSession) -> Result<(), StoreError>;

    async fn find_session(&self, id: &str) -> Result<Option<TestSession>, StoreError>;

    /// draft -> active. `None` when the session is missing or not a draft.
    async fn activate_session(
        &self,
        id: &str,
        activation: Activation,
    ) -> Result<Option<TestSession>, StoreError>;

    /// Moves a session whose status is one of `from` into `to`. `None` when no row matched.
    async fn transition_session(
        &self,
        id: &str,
        from: &[SessionStatus],
        to: SessionStatus,
        now: PrimitiveDateTime,
    ) -> Result<Option<TestSession>, StoreError>;

    async fn list_expired_sessions(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<TestSession>, StoreError>;

    /// Completed or cancelled sessions that still own in-progress attempts.
    async fn list_closed_sessions_with_open_attempts(
        &self,
        limit: i64,
    ) -> Result<Vec<String>, StoreError>;

    /// Completed sessions matching the filter, oldest deadline first.
    async fn list_completed_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<TestSession>, StoreError>;

    /// Inserts unless the (session, student) pair already has an attempt. Returns the stored
    /// row and whether this call created it.
    async fn insert_attempt_if_absent(&self, attempt: &Attempt)
        -> Result<(Attempt, bool), StoreError>;

    async fn find_attempt(&self, id: &str) -> Result<Option<Attempt>, StoreError>;

    async fn list_attempts(&self, session_id: &str) -> Result<Vec<Attempt>, StoreError>;

    async fn list_attempts_for_sessions(
        &self,
        session_ids: &[String],
    ) -> Result<Vec<Attempt>, StoreError>;

    async fn list_open_attempt_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError>;

    /// Overwrites one answer while the attempt is in progress. `false` when the attempt is
    /// missing or already frozen.
    async fn record_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
        selection: Option<u32>,
        now: PrimitiveDateTime,
    ) -> Result<bool, StoreError>;

    /// Applies `seal` to the attempt if, and only if, it is still in progress. `None` when the
    /// attempt does not exist.
    async fn seal_attempt(
        &self,
        attempt_id: &str,
        seal: SealFn<'_>,
    ) -> Result<Option<SealOutcome>, StoreError>;
}
