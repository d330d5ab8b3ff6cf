//! Session checkpoints and the stores that persist them.
//!
//! A checkpoint is written after every phase transition and holds
//! everything needed to continue the session: the input context, the
//! accepted program so far, the agent log and any synthesized delta that
//! has not been resolved yet.
//!
//! Payloads carry a `schemaVersion`. Version 1 payloads (written before
//! round deltas were persisted) are migrated on load. Each checkpoint is
//! sealed with a SHA-256 digest of its state; a payload whose digest does
//! not match is rejected.

mod file;
mod memory;
mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use planwright_db::models::{SessionPhase, SessionStatus};

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use postgres::PgCheckpointStore;

use crate::model::{BusinessContext, Program, UpstreamInsights};
use crate::synthesis::{AgentOutput, ProgramDraft, RoundDelta};

/// Version written by this build.
pub const SCHEMA_VERSION: u64 = 2;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("unsupported checkpoint schema version {0}")]
    UnsupportedVersion(u64),

    #[error("checkpoint payload is not a JSON object")]
    NotAnObject,

    #[error("checkpoint digest mismatch for session {0}")]
    DigestMismatch(Uuid),

    #[error("malformed checkpoint: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Why and where a session failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub phase: SessionPhase,
    pub round: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub schema_version: u64,
    pub session_id: Uuid,
    pub user_id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub status: SessionStatus,
    /// Round of the most recent completed phase; 0 before round 1 starts.
    pub round_index: u32,
    /// Most recent completed phase of `round_index`.
    #[serde(default)]
    pub phase: Option<SessionPhase>,
    pub context: BusinessContext,
    #[serde(default)]
    pub insights: UpstreamInsights,
    #[serde(default)]
    pub program_so_far: ProgramDraft,
    #[serde(default)]
    pub agent_log: Vec<AgentOutput>,
    #[serde(default)]
    pub pending_delta: Option<RoundDelta>,
    #[serde(default)]
    pub failure: Option<FailureRecord>,
    #[serde(default)]
    pub final_program: Option<Program>,
    #[serde(default)]
    pub digest: String,
    pub saved_at: DateTime<Utc>,
}

/// The part of a checkpoint covered by its digest.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DigestView<'a> {
    session_id: Uuid,
    status: SessionStatus,
    round_index: u32,
    phase: Option<SessionPhase>,
    program_so_far: &'a ProgramDraft,
    agent_log: &'a [AgentOutput],
    pending_delta: Option<&'a RoundDelta>,
    final_program: Option<&'a Program>,
}

impl Checkpoint {
    /// A fresh checkpoint for a session that has not run any round.
    pub fn new(
        session_id: Uuid,
        user_id: impl Into<String>,
        correlation_id: Option<String>,
        context: BusinessContext,
        insights: UpstreamInsights,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            session_id,
            user_id: user_id.into(),
            correlation_id,
            status: SessionStatus::Pending,
            round_index: 0,
            phase: None,
            context,
            insights,
            program_so_far: ProgramDraft::new(),
            agent_log: Vec::new(),
            pending_delta: None,
            failure: None,
            final_program: None,
            digest: String::new(),
            saved_at: Utc::now(),
        }
    }

    pub fn compute_digest(&self) -> Result<String, serde_json::Error> {
        let view = DigestView {
            session_id: self.session_id,
            status: self.status,
            round_index: self.round_index,
            phase: self.phase,
            program_so_far: &self.program_so_far,
            agent_log: &self.agent_log,
            pending_delta: self.pending_delta.as_ref(),
            final_program: self.final_program.as_ref(),
        };
        let bytes = serde_json::to_vec(&view)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Stamp the save time and recompute the digest.
    pub fn seal(&mut self) -> Result<(), CheckpointError> {
        self.schema_version = SCHEMA_VERSION;
        self.saved_at = Utc::now();
        self.digest = self.compute_digest()?;
        Ok(())
    }

    pub fn verify(&self) -> Result<(), CheckpointError> {
        if self.compute_digest()? != self.digest {
            return Err(CheckpointError::DigestMismatch(self.session_id));
        }
        Ok(())
    }

    pub fn to_value(&self) -> Result<Value, CheckpointError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a stored payload, migrating older schema versions and
    /// checking the digest.
    pub fn from_value(value: Value) -> Result<Self, CheckpointError> {
        let (value, migrated) = migrate(value)?;
        let mut checkpoint: Checkpoint = serde_json::from_value(value)?;
        if migrated {
            // Version 1 had no digest to check against.
            checkpoint.digest = checkpoint.compute_digest()?;
        } else {
            checkpoint.verify()?;
        }
        Ok(checkpoint)
    }

    /// Logged outputs of `round`, in agent id order.
    pub fn outputs_for_round(&self, round: u32) -> Vec<AgentOutput> {
        let mut outputs: Vec<AgentOutput> = self
            .agent_log
            .iter()
            .filter(|o| o.round == round)
            .cloned()
            .collect();
        outputs.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        outputs
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id,
            user_id: self.user_id.clone(),
            correlation_id: self.correlation_id.clone(),
            status: self.status,
            round_index: self.round_index,
            phase: self.phase,
            failure_reason: self.failure.as_ref().map(|f| f.reason.clone()),
            updated_at: self.saved_at,
        }
    }
}

/// Bring a stored payload up to [`SCHEMA_VERSION`].
///
/// Returns the migrated payload and whether anything changed.
pub fn migrate(mut value: Value) -> Result<(Value, bool), CheckpointError> {
    let version = value
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .unwrap_or(1);

    match version {
        SCHEMA_VERSION => Ok((value, false)),
        1 => {
            let obj = value.as_object_mut().ok_or(CheckpointError::NotAnObject)?;
            if let Some(round) = obj.remove("round") {
                obj.insert("roundIndex".into(), round);
            }
            obj.insert("pendingDelta".into(), Value::Null);
            obj.insert("schemaVersion".into(), Value::from(SCHEMA_VERSION));
            obj.remove("digest");
            Ok((value, true))
        }
        other => Err(CheckpointError::UnsupportedVersion(other)),
    }
}

/// Listing entry for a stored session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub user_id: String,
    pub correlation_id: Option<String>,
    pub status: SessionStatus,
    pub round_index: u32,
    pub phase: Option<SessionPhase>,
    pub failure_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Durable storage for session checkpoints and the agent output log.
///
/// Implementations must survive process restarts for resume to work
/// (the in-memory store is for tests and one-shot runs).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Replace the session's latest checkpoint. `checkpoint` must be sealed.
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Load, migrate and verify the latest checkpoint.
    ///
    /// Decoding failures are returned as a [`CheckpointError`] inside the
    /// `anyhow::Error`.
    async fn load_checkpoint(&self, session_id: Uuid) -> Result<Option<Checkpoint>>;

    /// Append outputs to the session's audit log. Outputs already logged
    /// for the same (round, agent) are left untouched. Returns how many
    /// were newly written.
    async fn append_agent_outputs(&self, session_id: Uuid, outputs: &[AgentOutput]) -> Result<usize>;

    /// Outputs logged for one round of a session, in agent id order.
    async fn load_agent_outputs(&self, session_id: Uuid, round: u32) -> Result<Vec<AgentOutput>>;

    /// Sessions known to the store, most recently updated first.
    async fn list_sessions(&self, user_id: Option<&str>) -> Result<Vec<SessionSummary>>;

    /// The most recently updated non-terminal session submitted under
    /// `correlation_id`.
    async fn find_active_session(&self, correlation_id: &str) -> Result<Option<SessionSummary>> {
        Ok(self
            .list_sessions(None)
            .await?
            .into_iter()
            .find(|s| !s.status.is_terminal() && s.correlation_id.as_deref() == Some(correlation_id)))
    }
}

// Compile-time assertion: CheckpointStore must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn CheckpointStore) {}
};


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn sealed_checkpoint_roundtrips() {
        let cp = sealed("user-1");
        let back = Checkpoint::from_value(cp.to_value().unwrap()).unwrap();
        assert_eq!(back, cp);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let cp = sealed("user-1");
        let mut value = cp.to_value().unwrap();
        value["roundIndex"] = Value::from(5);
        let err = Checkpoint::from_value(value).unwrap_err();
        assert!(matches!(err, CheckpointError::DigestMismatch(id) if id == cp.session_id));
    }

    #[test]
    fn version_one_payload_is_migrated() {
        let cp = sealed("user-1");
        let mut value = cp.to_value().unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove("schemaVersion");
        obj.remove("pendingDelta");
        obj.remove("digest");
        let round = obj.remove("roundIndex").unwrap();
        obj.insert("round".into(), round);
        obj.insert("phase".into(), Value::from("synthesis"));

        let migrated = Checkpoint::from_value(value).unwrap();
        assert_eq!(migrated.schema_version, SCHEMA_VERSION);
        assert_eq!(migrated.phase, Some(SessionPhase::Synthesis));
        assert!(migrated.pending_delta.is_none());
        assert_eq!(migrated.digest, migrated.compute_digest().unwrap());
    }

    #[test]
    fn future_versions_are_rejected() {
        let mut value = sealed("user-1").to_value().unwrap();
        value["schemaVersion"] = Value::from(9);
        assert!(matches!(
            Checkpoint::from_value(value),
            Err(CheckpointError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(matches!(
            Checkpoint::from_value(Value::from("nope")),
            Err(CheckpointError::NotAnObject)
        ));
    }
}
