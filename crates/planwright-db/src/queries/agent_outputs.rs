//! Database query functions for the append-only `agent_outputs` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::AgentOutputRow;

/// Parameters for inserting an agent output row.
#[derive(Debug, Clone)]
pub struct NewAgentOutput<'a> {
    pub session_id: Uuid,
    pub round: i32,
    pub agent_id: &'a str,
    pub confidence: f64,
    pub output: &'a Value,
}

/// Append an agent output.
///
/// Rows are never updated: a second insert for the same
/// `(session_id, round, agent_id)` is ignored. Returns `true` when a row was
/// written.
pub async fn insert_agent_output<'e, E>(executor: E, new: &NewAgentOutput<'_>) -> Result<bool>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "INSERT INTO agent_outputs (session_id, round, agent_id, confidence, output) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (session_id, round, agent_id) DO NOTHING",
    )
    .bind(new.session_id)
    .bind(new.round)
    .bind(new.agent_id)
    .bind(new.confidence)
    .bind(new.output)
    .execute(executor)
    .await
    .with_context(|| {
        format!(
            "failed to insert output of agent {} for session {} round {}",
            new.agent_id, new.session_id, new.round
        )
    })?;

    Ok(result.rows_affected() == 1)
}

/// List every output recorded for a session, ordered by round then agent id.
pub async fn list_outputs_for_session(
    pool: &PgPool,
    session_id: Uuid,
) -> Result<Vec<AgentOutputRow>> {
    let rows = sqlx::query_as::<_, AgentOutputRow>(
        "SELECT * FROM agent_outputs \
         WHERE session_id = $1 \
         ORDER BY round ASC, agent_id ASC",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list agent outputs for session {session_id}"))?;

    Ok(rows)
}

/// Count the outputs recorded for one round of a session.
pub async fn count_outputs_for_round(pool: &PgPool, session_id: Uuid, round: i32) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM agent_outputs WHERE session_id = $1 AND round = $2",
    )
    .bind(session_id)
    .bind(round)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to count agent outputs for session {session_id}"))?;

    Ok(count)
}

/// List the outputs recorded for one round of a session, ordered by agent id.
pub async fn list_outputs_for_round(
    pool: &PgPool,
    session_id: Uuid,
    round: i32,
) -> Result<Vec<AgentOutputRow>> {
    let rows = sqlx::query_as::<_, AgentOutputRow>(
        "SELECT * FROM agent_outputs \
         WHERE session_id = $1 AND round = $2 \
         ORDER BY agent_id ASC",
    )
    .bind(session_id)
    .bind(round)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list round {round} outputs for session {session_id}"))?;

    Ok(rows)
}
