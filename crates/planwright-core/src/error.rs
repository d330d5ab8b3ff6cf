use thiserror::Error;
use uuid::Uuid;

use planwright_db::models::{SessionPhase, SessionStatus};

use crate::model::ContextError;

/// Errors surfaced by [`Orchestrator`](crate::Orchestrator) operations.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid business context: {0}")]
    InvalidContext(#[from] ContextError),

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("session {session_id} cannot be resumed: status is {status}")]
    SessionNotResumable { session_id: Uuid, status: SessionStatus },

    #[error("session {0} is already running in this process")]
    SessionBusy(Uuid),

    #[error("checkpoint for session {session_id} is invalid: {reason}")]
    InvalidCheckpoint { session_id: Uuid, reason: String },

    #[error("session {session_id} failed during {phase} of round {round}: {reason}")]
    SessionFailed {
        session_id: Uuid,
        phase: SessionPhase,
        round: u32,
        reason: String,
    },

    #[error("session {0} was cancelled")]
    Cancelled(Uuid),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl GenerationError {
    /// The session this error refers to, when there is one.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            Self::SessionNotFound(id) | Self::SessionBusy(id) | Self::Cancelled(id) => Some(*id),
            Self::SessionNotResumable { session_id, .. }
            | Self::InvalidCheckpoint { session_id, .. }
            | Self::SessionFailed { session_id, .. } => Some(*session_id),
            Self::InvalidContext(_) | Self::Store(_) => None,
        }
    }
}
