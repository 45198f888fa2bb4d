use std::collections::HashMap;

use async_trait::async_trait;
use time::PrimitiveDateTime;
use tokio::sync::RwLock;

use crate::db::models::{Attempt, TestSession};
use crate::db::types::{AttemptStatus, SessionStatus};
use crate::repositories::{
    Activation, EngineStore, SealFn, SealOutcome, SessionFilter, StoreError,
};

/// Process-local store with the same transition semantics as Postgres. One lock guards both
/// tables, so every conditional update is trivially atomic.
#[derive(Default)]
pub(crate) struct MemoryStore {
    tables: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, TestSession>,
    attempts: HashMap<String, Attempt>,
    by_student: HashMap<(String, String), String>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

fn sorted_attempts<'a>(attempts: impl Iterator<Item = &'a Attempt>) -> Vec<Attempt> {
    let mut rows: Vec<Attempt> = attempts.cloned().collect();
    rows.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
    rows
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_session(&self, session: &TestSession) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, id: &str) -> Result<Option<TestSession>, StoreError> {
        Ok(self.tables.read().await.sessions.get(id).cloned())
    }

    async fn activate_session(
        &self,
        id: &str,
        activation: Activation,
    ) -> Result<Option<TestSession>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(session) = tables.sessions.get_mut(id) else {
            return Ok(None);
        };
        if session.status != SessionStatus::Draft {
            return Ok(None);
        }

        session.status = SessionStatus::Active;
        session.duration_minutes = Some(activation.duration_minutes);
        session.started_at = Some(activation.started_at);
        session.ends_at = Some(activation.ends_at);
        session.updated_at = activation.started_at;
        Ok(Some(session.clone()))
    }

    async fn transition_session(
        &self,
        id: &str,
        from: &[SessionStatus],
        to: SessionStatus,
        now: PrimitiveDateTime,
    ) -> Result<Option<TestSession>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(session) = tables.sessions.get_mut(id) else {
            return Ok(None);
        };
        if !from.contains(&session.status) {
            return Ok(None);
        }

        session.status = to;
        if to.is_terminal() {
            session.closed_at = Some(now);
        }
        session.updated_at = now;
        Ok(Some(session.clone()))
    }

    async fn list_expired_sessions(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<TestSession>, StoreError> {
        let tables = self.tables.read().await;
        let mut expired: Vec<TestSession> = tables
            .sessions
            .values()
            .filter(|session| session.is_expired_at(now))
            .cloned()
            .collect();
        expired.sort_by(|a, b| a.ends_at.cmp(&b.ends_at).then_with(|| a.id.cmp(&b.id)));
        expired.truncate(limit.clamp(1, 10_000) as usize);
        Ok(expired)
    }

    async fn list_closed_sessions_with_open_attempts(
        &self,
        limit: i64,
    ) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read().await;
        let mut ids: Vec<String> = tables
            .attempts
            .values()
            .filter(|attempt| attempt.status == AttemptStatus::InProgress)
            .filter(|attempt| {
                tables
                    .sessions
                    .get(&attempt.session_id)
                    .is_some_and(|session| session.status.is_terminal())
            })
            .map(|attempt| attempt.session_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids.truncate(limit.clamp(1, 10_000) as usize);
        Ok(ids)
    }

    async fn list_completed_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<TestSession>, StoreError> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<TestSession> = tables
            .sessions
            .values()
            .filter(|session| session.status == SessionStatus::Completed)
            .filter(|session| {
                filter.created_by.as_ref().map_or(true, |value| &session.created_by == value)
            })
            .filter(|session| {
                filter.classroom_id.as_ref().map_or(true, |value| &session.classroom_id == value)
            })
            .filter(|session| {
                filter.subject.as_ref().map_or(true, |value| &session.paper_snapshot.subject == value)
            })
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.ends_at.cmp(&b.ends_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }

    async fn insert_attempt_if_absent(
        &self,
        attempt: &Attempt,
    ) -> Result<(Attempt, bool), StoreError> {
        let mut tables = self.tables.write().await;
        let key = (attempt.session_id.clone(), attempt.student_id.clone());

        if let Some(existing_id) = tables.by_student.get(&key) {
            if let Some(existing) = tables.attempts.get(existing_id) {
                return Ok((existing.clone(), false));
            }
        }

        tables.by_student.insert(key, attempt.id.clone());
        tables.attempts.insert(attempt.id.clone(), attempt.clone());
        Ok((attempt.clone(), true))
    }

    async fn find_attempt(&self, id: &str) -> Result<Option<Attempt>, StoreError> {
        Ok(self.tables.read().await.attempts.get(id).cloned())
    }

    async fn list_attempts(&self, session_id: &str) -> Result<Vec<Attempt>, StoreError> {
        let tables = self.tables.read().await;
        Ok(sorted_attempts(
            tables.attempts.values().filter(|attempt| attempt.session_id == session_id),
        ))
    }

    async fn list_attempts_for_sessions(
        &self,
        session_ids: &[String],
    ) -> Result<Vec<Attempt>, StoreError> {
        let tables = self.tables.read().await;
        Ok(sorted_attempts(
            tables.attempts.values().filter(|attempt| session_ids.contains(&attempt.session_id)),
        ))
    }

    async fn list_open_attempt_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read().await;
        let mut ids: Vec<String> = tables
            .attempts
            .values()
            .filter(|attempt| {
                attempt.session_id == session_id && attempt.status == AttemptStatus::InProgress
            })
            .map(|attempt| attempt.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn record_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
        selection: Option<u32>,
        now: PrimitiveDateTime,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(attempt) = tables.attempts.get_mut(attempt_id) else {
            return Ok(false);
        };
        if attempt.status != AttemptStatus::InProgress {
            return Ok(false);
        }

        attempt.answers.0.insert(question_id.to_string(), selection);
        attempt.updated_at = now;
        Ok(true)
    }

    async fn seal_attempt(
        &self,
        attempt_id: &str,
        seal: SealFn<'_>,
    ) -> Result<Option<SealOutcome>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(current) = tables.attempts.get_mut(attempt_id) else {
            return Ok(None);
        };

        if current.is_terminal() {
            return Ok(Some(SealOutcome::AlreadySealed(current.clone())));
        }

        let sealed = seal(current);
        *current = sealed.clone();
        Ok(Some(SealOutcome::Sealed(sealed)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use sqlx::types::Json;
    use time::macros::datetime;

    use super::*;
    use crate::db::models::AnswerSheet;

    fn attempt(id: &str, session_id: &str, student_id: &str) -> Attempt {
        let now = datetime!(2025-03-10 09:00:00);
        let mut answers = AnswerSheet::new();
        answers.insert("q1".to_string(), None);
        Attempt {
            id: id.to_string(),
            session_id: session_id.to_string(),
            student_id: student_id.to_string(),
            status: AttemptStatus::InProgress,
            answers: Json(answers),
            started_at: now,
            submitted_at: None,
            total_time_seconds: None,
            score_card: None,
            score_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn second_insert_for_same_student_returns_first_row() {
        let store = MemoryStore::new();

        let (first, created) =
            store.insert_attempt_if_absent(&attempt("a1", "s1", "st1")).await.unwrap();
        assert!(created);
        let (second, created) =
            store.insert_attempt_if_absent(&attempt("a2", "s1", "st1")).await.unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert!(store.find_attempt("a2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn seal_runs_once_and_freezes_answers() {
        let store = MemoryStore::new();
        store.insert_attempt_if_absent(&attempt("a1", "s1", "st1")).await.unwrap();

        let calls = AtomicUsize::new(0);
        let seal = |current: &Attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            let mut sealed = current.clone();
            sealed.status = AttemptStatus::Submitted;
            sealed
        };

        let first = store.seal_attempt("a1", &seal).await.unwrap().unwrap();
        let second = store.seal_attempt("a1", &seal).await.unwrap().unwrap();

        assert!(matches!(first, SealOutcome::Sealed(_)));
        assert!(matches!(second, SealOutcome::AlreadySealed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let written = store
            .record_answer("a1", "q1", Some(2), datetime!(2025-03-10 09:05:00))
            .await
            .unwrap();
        assert!(!written);
        let stored = store.find_attempt("a1").await.unwrap().unwrap();
        assert_eq!(stored.answers.0.get("q1"), Some(&None));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_seals_pick_exactly_one_winner() {
        let store = Arc::new(MemoryStore::new());
        store.insert_attempt_if_absent(&attempt("a1", "s1", "st1")).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for status in [AttemptStatus::Submitted, AttemptStatus::TimedOut] {
            let store = store.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                let seal = move |current: &Attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let mut sealed = current.clone();
                    sealed.status = status;
                    sealed
                };
                store.seal_attempt("a1", &seal).await.unwrap().unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), SealOutcome::Sealed(_)) {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.find_attempt("a1").await.unwrap().unwrap().is_terminal());
    }
}
