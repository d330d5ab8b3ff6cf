use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use planwright_db::models::Session;
use planwright_db::queries::agent_outputs::{self, NewAgentOutput};
use planwright_db::queries::checkpoints::{self, NewCheckpoint};
use planwright_db::queries::sessions::{self, SessionUpsert};

use super::{Checkpoint, CheckpointStore, SessionSummary};
use crate::synthesis::AgentOutput;

/// Upper bound on rows returned by [`CheckpointStore::list_sessions`].
const LIST_LIMIT: i64 = 200;

/// PostgreSQL-backed store over the `sessions`, `checkpoints` and
/// `agent_outputs` tables.
#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let payload = checkpoint.to_value()?;
        let round_index = i32::try_from(checkpoint.round_index).context("round index out of range")?;
        let schema_version =
            i32::try_from(checkpoint.schema_version).context("schema version out of range")?;

        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;
        sessions::upsert_session(
            &mut *tx,
            &SessionUpsert {
                id: checkpoint.session_id,
                user_id: &checkpoint.user_id,
                correlation_id: checkpoint.correlation_id.as_deref(),
                status: checkpoint.status,
                round_index,
                phase: checkpoint.phase,
                failure_reason: checkpoint.failure.as_ref().map(|f| f.reason.as_str()),
            },
        )
        .await?;
        checkpoints::save_checkpoint(
            &mut *tx,
            &NewCheckpoint {
                session_id: checkpoint.session_id,
                schema_version,
                round_index,
                phase: checkpoint.phase,
                payload: &payload,
                digest: &checkpoint.digest,
            },
        )
        .await?;
        tx.commit().await.context("failed to commit checkpoint")?;
        Ok(())
    }

    async fn load_checkpoint(&self, session_id: Uuid) -> Result<Option<Checkpoint>> {
        let Some(row) = checkpoints::load_checkpoint(&self.pool, session_id).await? else {
            return Ok(None);
        };
        Ok(Some(Checkpoint::from_value(row.payload)?))
    }

    async fn append_agent_outputs(&self, session_id: Uuid, outputs: &[AgentOutput]) -> Result<usize> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;
        let mut written = 0;
        for output in outputs {
            let value = serde_json::to_value(output)?;
            let inserted = agent_outputs::insert_agent_output(
                &mut *tx,
                &NewAgentOutput {
                    session_id,
                    round: i32::try_from(output.round).context("round out of range")?,
                    agent_id: &output.agent_id,
                    confidence: output.confidence,
                    output: &value,
                },
            )
            .await?;
            if inserted {
                written += 1;
            }
        }
        tx.commit().await.context("failed to commit agent outputs")?;
        Ok(written)
    }

    async fn load_agent_outputs(&self, session_id: Uuid, round: u32) -> Result<Vec<AgentOutput>> {
        let round = i32::try_from(round).context("round out of range")?;
        agent_outputs::list_outputs_for_round(&self.pool, session_id, round)
            .await?
            .into_iter()
            .map(|row| {
                serde_json::from_value(row.output).with_context(|| {
                    format!("malformed output of agent {} in round {round}", row.agent_id)
                })
            })
            .collect()
    }

    async fn list_sessions(&self, user_id: Option<&str>) -> Result<Vec<SessionSummary>> {
        let rows = sessions::list_sessions(&self.pool, user_id, LIST_LIMIT).await?;
        Ok(rows.into_iter().map(summary).collect())
    }

    async fn find_active_session(&self, correlation_id: &str) -> Result<Option<SessionSummary>> {
        Ok(sessions::find_active_by_correlation(&self.pool, correlation_id)
            .await?
            .map(summary))
    }
}

fn summary(session: Session) -> SessionSummary {
    SessionSummary {
        session_id: session.id,
        user_id: session.user_id,
        correlation_id: session.correlation_id,
        status: session.status,
        round_index: u32::try_from(session.round_index).unwrap_or(0),
        phase: session.phase,
        failure_reason: session.failure_reason,
        updated_at: session.updated_at,
    }
}
