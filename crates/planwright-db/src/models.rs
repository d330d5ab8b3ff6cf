use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a generation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Synthesizing,
    ResolvingConflicts,
    Finalizing,
    Completed,
    Failed,
}

impl SessionStatus {
    /// `true` for `completed` and `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Synthesizing => "synthesizing",
            Self::ResolvingConflicts => "resolving_conflicts",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for SessionStatus {
    type Err = SessionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "synthesizing" => Ok(Self::Synthesizing),
            "resolving_conflicts" => Ok(Self::ResolvingConflicts),
            "finalizing" => Ok(Self::Finalizing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(SessionStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`SessionStatus`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid session status: {0:?}")]
pub struct SessionStatusParseError(pub String);

// ---------------------------------------------------------------------------

/// The phase of a round that a checkpoint was written after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Agent outputs for the round have been collected.
    Collection,
    /// The round delta has been synthesized.
    Synthesis,
    /// Conflicts have been resolved and the delta applied.
    Resolution,
    /// The final program has been assembled.
    Finalization,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Collection => "collection",
            Self::Synthesis => "synthesis",
            Self::Resolution => "resolution",
            Self::Finalization => "finalization",
        };
        f.write_str(s)
    }
}

impl FromStr for SessionPhase {
    type Err = SessionPhaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collection" => Ok(Self::Collection),
            "synthesis" => Ok(Self::Synthesis),
            "resolution" => Ok(Self::Resolution),
            "finalization" => Ok(Self::Finalization),
            other => Err(SessionPhaseParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`SessionPhase`] string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid session phase: {0:?}")]
pub struct SessionPhaseParseError(pub String);

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A generation session.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub correlation_id: Option<String>,
    pub status: SessionStatus,
    pub round_index: i32,
    pub phase: Option<SessionPhase>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The latest checkpoint of a session. The payload is the engine's
/// serialized checkpoint; this crate does not interpret it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CheckpointRow {
    pub session_id: Uuid,
    pub schema_version: i32,
    pub round_index: i32,
    pub phase: Option<SessionPhase>,
    pub payload: serde_json::Value,
    pub digest: String,
    pub saved_at: DateTime<Utc>,
}

/// One agent's output for one round.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AgentOutputRow {
    pub id: i64,
    pub session_id: Uuid,
    pub round: i32,
    pub agent_id: String,
    pub confidence: f64,
    pub output: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
