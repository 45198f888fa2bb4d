pub(crate) mod attempts;
pub(crate) mod sessions;

use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{Attempt, TestSession};
use crate::db::types::SessionStatus;
use crate::repositories::{
    Activation, EngineStore, SealFn, SealOutcome, SessionFilter, StoreError,
};

#[derive(Clone)]
pub(crate) struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EngineStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_session(&self, session: &TestSession) -> Result<(), StoreError> {
        Ok(sessions::create(&self.pool, session).await?)
    }

    async fn find_session(&self, id: &str) -> Result<Option<TestSession>, StoreError> {
        Ok(sessions::find_by_id(&self.pool, id).await?)
    }

    async fn activate_session(
        &self,
        id: &str,
        activation: Activation,
    ) -> Result<Option<TestSession>, StoreError> {
        Ok(sessions::activate(&self.pool, id, activation).await?)
    }

    async fn transition_session(
        &self,
        id: &str,
        from: &[SessionStatus],
        to: SessionStatus,
        now: PrimitiveDateTime,
    ) -> Result<Option<TestSession>, StoreError> {
        Ok(sessions::transition(&self.pool, id, from, to, now).await?)
    }

    async fn list_expired_sessions(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<TestSession>, StoreError> {
        Ok(sessions::list_expired(&self.pool, now, limit).await?)
    }

    async fn list_closed_sessions_with_open_attempts(
        &self,
        limit: i64,
    ) -> Result<Vec<String>, StoreError> {
        Ok(sessions::list_closed_with_open_attempts(&self.pool, limit).await?)
    }

    async fn list_completed_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<TestSession>, StoreError> {
        Ok(sessions::list_completed(&self.pool, filter).await?)
    }

    async fn insert_attempt_if_absent(
        &self,
        attempt: &Attempt,
    ) -> Result<(Attempt, bool), StoreError> {
        Ok(attempts::create_if_absent(&self.pool, attempt).await?)
    }

    async fn find_attempt(&self, id: &str) -> Result<Option<Attempt>, StoreError> {
        Ok(attempts::find_by_id(&self.pool, id).await?)
    }

    async fn list_attempts(&self, session_id: &str) -> Result<Vec<Attempt>, StoreError> {
        Ok(attempts::list_by_session(&self.pool, session_id).await?)
    }

    async fn list_attempts_for_sessions(
        &self,
        session_ids: &[String],
    ) -> Result<Vec<Attempt>, StoreError> {
        Ok(attempts::list_by_sessions(&self.pool, session_ids).await?)
    }

    async fn list_open_attempt_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(attempts::list_open_ids(&self.pool, session_id).await?)
    }

    async fn record_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
        selection: Option<u32>,
        now: PrimitiveDateTime,
    ) -> Result<bool, StoreError> {
        Ok(attempts::record_answer(&self.pool, attempt_id, question_id, selection, now).await?)
    }

    async fn seal_attempt(
        &self,
        attempt_id: &str,
        seal: SealFn<'_>,
    ) -> Result<Option<SealOutcome>, StoreError> {
        Ok(attempts::seal(&self.pool, attempt_id, seal).await?)
    }
}
