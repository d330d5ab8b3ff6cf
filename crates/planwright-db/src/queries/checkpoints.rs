//! Database query functions for the `checkpoints` table.
//!
//! Only the latest checkpoint per session is kept; every save replaces the
//! previous one.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::{CheckpointRow, SessionPhase};

/// Parameters for saving a checkpoint row.
#[derive(Debug, Clone)]
pub struct NewCheckpoint<'a> {
    pub session_id: Uuid,
    pub schema_version: i32,
    pub round_index: i32,
    pub phase: Option<SessionPhase>,
    pub payload: &'a Value,
    pub digest: &'a str,
}

/// Save (insert or replace) the checkpoint for a session.
pub async fn save_checkpoint<'e, E>(executor: E, checkpoint: &NewCheckpoint<'_>) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO checkpoints \
             (session_id, schema_version, round_index, phase, payload, digest) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (session_id) DO UPDATE SET \
             schema_version = EXCLUDED.schema_version, \
             round_index = EXCLUDED.round_index, \
             phase = EXCLUDED.phase, \
             payload = EXCLUDED.payload, \
             digest = EXCLUDED.digest, \
             saved_at = now()",
    )
    .bind(checkpoint.session_id)
    .bind(checkpoint.schema_version)
    .bind(checkpoint.round_index)
    .bind(checkpoint.phase)
    .bind(checkpoint.payload)
    .bind(checkpoint.digest)
    .execute(executor)
    .await
    .with_context(|| {
        format!(
            "failed to save checkpoint for session {} (round {}, phase {:?})",
            checkpoint.session_id, checkpoint.round_index, checkpoint.phase
        )
    })?;

    Ok(())
}

/// Load the latest checkpoint for a session.
pub async fn load_checkpoint(pool: &PgPool, session_id: Uuid) -> Result<Option<CheckpointRow>> {
    let row = sqlx::query_as::<_, CheckpointRow>(
        "SELECT * FROM checkpoints WHERE session_id = $1",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to load checkpoint for session {session_id}"))?;

    Ok(row)
}
