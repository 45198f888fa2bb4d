use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use time::PrimitiveDateTime;

use crate::db::models::Attempt;
use crate::db::types::AttemptStatus;
use crate::repositories::{SealFn, SealOutcome};

pub(crate) const COLUMNS: &str = "\
    id, session_id, student_id, status, answers, started_at, submitted_at, \
    total_time_seconds, score_card, score_error, created_at, updated_at";

pub(crate) async fn create_if_absent(
    pool: &PgPool,
    attempt: &Attempt,
) -> Result<(Attempt, bool), sqlx::Error> {
    let inserted = sqlx::query_as::<_, Attempt>(&format!(
        "INSERT INTO attempts (
            id, session_id, student_id, status, answers, started_at, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        ON CONFLICT (session_id, student_id) DO NOTHING
        RETURNING {COLUMNS}"
    ))
    .bind(&attempt.id)
    .bind(&attempt.session_id)
    .bind(&attempt.student_id)
    .bind(attempt.status)
    .bind(Json(&attempt.answers.0))
    .bind(attempt.started_at)
    .bind(attempt.created_at)
    .bind(attempt.updated_at)
    .fetch_optional(pool)
    .await?;

    if let Some(inserted) = inserted {
        return Ok((inserted, true));
    }

    let existing = sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM attempts WHERE session_id = $1 AND student_id = $2"
    ))
    .bind(&attempt.session_id)
    .bind(&attempt.student_id)
    .fetch_one(pool)
    .await?;

    Ok((existing, false))
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!("SELECT {COLUMNS} FROM attempts WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_by_session(
    pool: &PgPool,
    session_id: &str,
) -> Result<Vec<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM attempts WHERE session_id = $1 ORDER BY started_at, id"
    ))
    .bind(session_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_by_sessions(
    pool: &PgPool,
    session_ids: &[String],
) -> Result<Vec<Attempt>, sqlx::Error> {
    if session_ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM attempts WHERE session_id = ANY($1) ORDER BY started_at, id"
    ))
    .bind(session_ids)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_open_ids(
    pool: &PgPool,
    session_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM attempts WHERE session_id = $1 AND status = $2 ORDER BY id")
        .bind(session_id)
        .bind(AttemptStatus::InProgress)
        .fetch_all(pool)
        .await
}

pub(crate) async fn record_answer(
    pool: &PgPool,
    attempt_id: &str,
    question_id: &str,
    selection: Option<u32>,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE attempts
         SET answers = jsonb_set(answers, ARRAY[$1::text], COALESCE(to_jsonb($2::bigint), 'null'::jsonb)),
             updated_at = $3
         WHERE id = $4 AND status = $5",
    )
    .bind(question_id)
    .bind(selection.map(i64::from))
    .bind(now)
    .bind(attempt_id)
    .bind(AttemptStatus::InProgress)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Row-locks the attempt, then writes the sealed form only if it is still in progress.
/// A concurrent caller waits on the lock and afterwards reads the terminal row.
pub(crate) async fn seal(
    pool: &PgPool,
    attempt_id: &str,
    seal: SealFn<'_>,
) -> Result<Option<SealOutcome>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let current = lock_for_update(&mut tx, attempt_id).await?;
    let Some(current) = current else {
        tx.rollback().await?;
        return Ok(None);
    };

    if current.is_terminal() {
        tx.commit().await?;
        return Ok(Some(SealOutcome::AlreadySealed(current)));
    }

    let sealed = seal(&current);

    let stored = sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE attempts
         SET status = $1,
             answers = $2,
             submitted_at = $3,
             total_time_seconds = $4,
             score_card = $5,
             score_error = $6,
             updated_at = $7
         WHERE id = $8 AND status = $9
         RETURNING {COLUMNS}"
    ))
    .bind(sealed.status)
    .bind(Json(&sealed.answers.0))
    .bind(sealed.submitted_at)
    .bind(sealed.total_time_seconds)
    .bind(sealed.score_card.as_ref().map(|card| Json(&card.0)))
    .bind(&sealed.score_error)
    .bind(sealed.updated_at)
    .bind(attempt_id)
    .bind(AttemptStatus::InProgress)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(SealOutcome::Sealed(stored)))
}

async fn lock_for_update(
    tx: &mut Transaction<'_, Postgres>,
    attempt_id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM attempts WHERE id = $1 FOR UPDATE"
    ))
    .bind(attempt_id)
    .fetch_optional(&mut **tx)
    .await
}
