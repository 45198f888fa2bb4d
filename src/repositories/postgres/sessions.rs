use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::PrimitiveDateTime;

use crate::db::models::TestSession;
use crate::db::types::{AttemptStatus, SessionStatus};
use crate::repositories::{Activation, SessionFilter};

pub(crate) const COLUMNS: &str = "\
    id, classroom_id, created_by, paper_snapshot, roster, status, duration_minutes, \
    started_at, ends_at, closed_at, created_at, updated_at";

pub(crate) async fn create(pool: &PgPool, session: &TestSession) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO test_sessions (
            id, classroom_id, created_by, paper_snapshot, roster, status,
            duration_minutes, started_at, ends_at, closed_at, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
    )
    .bind(&session.id)
    .bind(&session.classroom_id)
    .bind(&session.created_by)
    .bind(Json(&session.paper_snapshot.0))
    .bind(Json(&session.roster.0))
    .bind(session.status)
    .bind(session.duration_minutes)
    .bind(session.started_at)
    .bind(session.ends_at)
    .bind(session.closed_at)
    .bind(session.created_at)
    .bind(session.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<TestSession>, sqlx::Error> {
    sqlx::query_as::<_, TestSession>(&format!("SELECT {COLUMNS} FROM test_sessions WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// `ends_at` is only ever written here, guarded by `status = 'draft'`, so it is set once.
pub(crate) async fn activate(
    pool: &PgPool,
    id: &str,
    activation: Activation,
) -> Result<Option<TestSession>, sqlx::Error> {
    sqlx::query_as::<_, TestSession>(&format!(
        "UPDATE test_sessions
         SET status = $1,
             duration_minutes = $2,
             started_at = $3,
             ends_at = $4,
             updated_at = $3
         WHERE id = $5 AND status = $6
         RETURNING {COLUMNS}"
    ))
    .bind(SessionStatus::Active)
    .bind(activation.duration_minutes)
    .bind(activation.started_at)
    .bind(activation.ends_at)
    .bind(id)
    .bind(SessionStatus::Draft)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn transition(
    pool: &PgPool,
    id: &str,
    from: &[SessionStatus],
    to: SessionStatus,
    now: PrimitiveDateTime,
) -> Result<Option<TestSession>, sqlx::Error> {
    sqlx::query_as::<_, TestSession>(&format!(
        "UPDATE test_sessions
         SET status = $1,
             closed_at = CASE WHEN $1 IN ('completed', 'cancelled') THEN $2 ELSE closed_at END,
             updated_at = $2
         WHERE id = $3 AND status = ANY($4)
         RETURNING {COLUMNS}"
    ))
    .bind(to)
    .bind(now)
    .bind(id)
    .bind(from.to_vec())
    .fetch_optional(pool)
    .await
}

pub(crate) async fn list_expired(
    pool: &PgPool,
    now: PrimitiveDateTime,
    limit: i64,
) -> Result<Vec<TestSession>, sqlx::Error> {
    sqlx::query_as::<_, TestSession>(&format!(
        "SELECT {COLUMNS} FROM test_sessions
         WHERE status = $1 AND ends_at <= $2
         ORDER BY ends_at, id
         LIMIT $3"
    ))
    .bind(SessionStatus::Active)
    .bind(now)
    .bind(limit.clamp(1, 10_000))
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_closed_with_open_attempts(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT DISTINCT s.id
         FROM test_sessions s
         JOIN attempts a ON a.session_id = s.id
         WHERE s.status = ANY($1) AND a.status = $2
         ORDER BY s.id
         LIMIT $3",
    )
    .bind(vec![SessionStatus::Completed, SessionStatus::Cancelled])
    .bind(AttemptStatus::InProgress)
    .bind(limit.clamp(1, 10_000))
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_completed(
    pool: &PgPool,
    filter: &SessionFilter,
) -> Result<Vec<TestSession>, sqlx::Error> {
    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "SELECT {COLUMNS} FROM test_sessions WHERE status = "
    ));
    builder.push_bind(SessionStatus::Completed);

    if let Some(created_by) = &filter.created_by {
        builder.push(" AND created_by = ");
        builder.push_bind(created_by.clone());
    }
    if let Some(classroom_id) = &filter.classroom_id {
        builder.push(" AND classroom_id = ");
        builder.push_bind(classroom_id.clone());
    }
    if let Some(subject) = &filter.subject {
        builder.push(" AND paper_snapshot->>'subject' = ");
        builder.push_bind(subject.clone());
    }

    builder.push(" ORDER BY ends_at, id");

    builder.build_query_as::<TestSession>().fetch_all(pool).await
}
