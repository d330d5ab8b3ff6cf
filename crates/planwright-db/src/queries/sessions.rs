//! Database query functions for the `sessions` table.

use anyhow::{Context, Result};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::{Session, SessionPhase, SessionStatus};

/// Parameters for inserting or updating a session row.
#[derive(Debug, Clone)]
pub struct SessionUpsert<'a> {
    pub id: Uuid,
    pub user_id: &'a str,
    pub correlation_id: Option<&'a str>,
    pub status: SessionStatus,
    pub round_index: i32,
    pub phase: Option<SessionPhase>,
    pub failure_reason: Option<&'a str>,
}

/// Insert a session, or update its progress columns if it already exists.
///
/// `user_id` and `correlation_id` are fixed at creation. `completed_at` is
/// stamped the first time the session reaches `completed`.
pub async fn upsert_session<'e, E>(executor: E, session: &SessionUpsert<'_>) -> Result<Session>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, Session>(
        "INSERT INTO sessions \
             (id, user_id, correlation_id, status, round_index, phase, failure_reason, completed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, \
                 CASE WHEN $4 = 'completed' THEN now() ELSE NULL END) \
         ON CONFLICT (id) DO UPDATE SET \
             status = EXCLUDED.status, \
             round_index = EXCLUDED.round_index, \
             phase = EXCLUDED.phase, \
             failure_reason = EXCLUDED.failure_reason, \
             updated_at = now(), \
             completed_at = COALESCE(sessions.completed_at, EXCLUDED.completed_at) \
         RETURNING *",
    )
    .bind(session.id)
    .bind(session.user_id)
    .bind(session.correlation_id)
    .bind(session.status)
    .bind(session.round_index)
    .bind(session.phase)
    .bind(session.failure_reason)
    .fetch_one(executor)
    .await
    .with_context(|| format!("failed to upsert session {}", session.id))?;

    Ok(row)
}

/// Fetch a session by its ID.
pub async fn get_session(pool: &PgPool, id: Uuid) -> Result<Option<Session>> {
    let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to fetch session {id}"))?;

    Ok(session)
}

/// List sessions, most recently updated first, optionally restricted to
/// one user.
pub async fn list_sessions(
    pool: &PgPool,
    user_id: Option<&str>,
    limit: i64,
) -> Result<Vec<Session>> {
    let sessions = sqlx::query_as::<_, Session>(
        "SELECT * FROM sessions \
         WHERE ($1::text IS NULL OR user_id = $1) \
         ORDER BY updated_at DESC \
         LIMIT $2",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list sessions")?;

    Ok(sessions)
}

/// Find the most recent non-terminal session carrying a correlation id.
///
/// Used to make job submission idempotent per correlation id.
pub async fn find_active_by_correlation(
    pool: &PgPool,
    correlation_id: &str,
) -> Result<Option<Session>> {
    let session = sqlx::query_as::<_, Session>(
        "SELECT * FROM sessions \
         WHERE correlation_id = $1 \
           AND status NOT IN ('completed', 'failed') \
         ORDER BY created_at DESC \
         LIMIT 1",
    )
    .bind(correlation_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to look up session for correlation id {correlation_id}"))?;

    Ok(session)
}
