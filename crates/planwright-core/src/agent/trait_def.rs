//! The `Agent` trait: one analytical role invoked once per round.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{BusinessContext, UpstreamInsights};
use crate::rounds::RoundSpec;
use crate::synthesis::{AgentOutput, Contribution, ProgramDraft};

/// Everything an agent may read. Agents receive shared snapshots and
/// cannot write program state; only the synthesizer does.
#[derive(Debug, Clone)]
pub struct AgentInput {
    pub round: RoundSpec,
    pub context: Arc<BusinessContext>,
    /// Only populated in round 1.
    pub insights: Option<Arc<UpstreamInsights>>,
    pub program_so_far: Arc<ProgramDraft>,
    /// Outputs of all earlier rounds.
    pub prior_outputs: Arc<Vec<AgentOutput>>,
}

/// What an agent returns for one round.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub contributions: Vec<Contribution>,
    /// In `[0, 1]`; values outside are clamped.
    pub confidence: f64,
    pub reasoning: String,
}

/// An analysis role.
///
/// `analyze` is invoked concurrently with the other agents of a round and
/// may be abandoned on timeout or cancellation.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier, also used as the tie-break key in conflicts.
    fn id(&self) -> &str;

    fn role(&self) -> &str;

    async fn analyze(&self, input: &AgentInput) -> Result<Analysis>;
}

// Compile-time assertion: Agent must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Agent) {}
};
