//! Progress events on a bounded channel.
//!
//! The orchestrator never waits on a consumer: when the channel is full or
//! the receiver is gone the event is dropped and logged.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::rounds::{TOTAL_ROUNDS, percent_complete};

/// Default capacity of [`ProgressSink::channel`] buffers.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    RoundStart,
    RoundComplete,
    AgentStart,
    AgentComplete,
    /// The agent failed or timed out and contributes nothing this round.
    AgentFailed,
    SynthesisStart,
    SynthesisComplete,
    ConflictResolutionStart,
    ConflictResolutionComplete,
    Finalizing,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub session_id: Uuid,
    pub round: u32,
    pub total_rounds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_agent: Option<String>,
    pub message: String,
    pub percent_complete: u8,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind, session_id: Uuid, round: u32, message: impl Into<String>) -> Self {
        // A round counts as done only once it has completed.
        let done = match kind {
            ProgressKind::RoundComplete | ProgressKind::Finalizing | ProgressKind::Completed => round,
            _ => round.saturating_sub(1),
        };
        Self {
            kind,
            session_id,
            round,
            total_rounds: TOTAL_ROUNDS,
            current_agent: None,
            message: message.into(),
            percent_complete: percent_complete(done),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.current_agent = Some(agent_id.into());
        self
    }
}

/// Sending half of a progress channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressSink {
    /// Create a sink and the stream its events arrive on.
    pub fn channel(capacity: usize) -> (Self, ReceiverStream<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, ReceiverStream::new(rx))
    }

    pub fn from_sender(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }

    /// Deliver `event` without blocking.
    pub fn emit(&self, event: ProgressEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    session_id = %event.session_id,
                    kind = ?event.kind,
                    "progress channel full, dropping event"
                );
            }
            Err(TrySendError::Closed(event)) => {
                tracing::debug!(
                    session_id = %event.session_id,
                    kind = ?event.kind,
                    "progress receiver closed, dropping event"
                );
            }
        }
    }
}
