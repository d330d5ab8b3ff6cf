//! Session orchestrator: drives a session through seven rounds of
//! collect, synthesize and resolve, then assembles the final program.
//!
//! Every phase ends with a checkpoint. A session interrupted for any reason
//! other than failure can be continued with [`Orchestrator::resume_session`],
//! which restarts at the first phase the checkpoint does not cover.

mod finalize;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use planwright_db::models::{SessionPhase, SessionStatus};

use crate::agent::{AgentInput, AgentPool};
use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, FailureRecord, SessionSummary};
use crate::conflict::resolve;
use crate::error::GenerationError;
use crate::knowledge::{KnowledgeLedger, candidates_from_program, curate};
use crate::model::{BusinessContext, Program, UpstreamInsights};
use crate::progress::{ProgressEvent, ProgressKind, ProgressSink};
use crate::rounds::{TOTAL_ROUNDS, round_spec};
use crate::state::SessionStateMachine;
use crate::synthesis::{AgentOutput, synthesize};

/// Configuration for an [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wall time allowed per agent call.
    pub agent_timeout: Duration,
    /// Maximum number of agents analyzing at once within a session.
    pub max_concurrent_agents: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agent_timeout: Duration::from_secs(120),
            max_concurrent_agents: 7,
        }
    }
}

/// Input to [`Orchestrator::generate`].
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub user_id: String,
    pub context: BusinessContext,
    pub upstream_insights: UpstreamInsights,
    pub correlation_id: Option<String>,
    pub progress: Option<ProgressSink>,
    /// Continue this session instead of starting a new one.
    pub resume_session_id: Option<Uuid>,
}

impl GenerateRequest {
    pub fn new(user_id: impl Into<String>, context: BusinessContext) -> Self {
        Self {
            user_id: user_id.into(),
            context,
            upstream_insights: UpstreamInsights::default(),
            correlation_id: None,
            progress: None,
            resume_session_id: None,
        }
    }

    pub fn with_insights(mut self, insights: UpstreamInsights) -> Self {
        self.upstream_insights = insights;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn resuming(mut self, session_id: Uuid) -> Self {
        self.resume_session_id = Some(session_id);
        self
    }
}

/// A finished session.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub session_id: Uuid,
    pub program: Program,
    pub knowledge: KnowledgeLedger,
}

/// The next phase to run for a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Collect(u32),
    Synthesize(u32),
    Resolve(u32),
    Finalize,
    Done,
}

fn next_step(checkpoint: &Checkpoint) -> Step {
    let round = checkpoint.round_index;
    match checkpoint.phase {
        None => Step::Collect(round + 1),
        Some(SessionPhase::Collection) => Step::Synthesize(round),
        // Checkpoints migrated from version 1 carry no delta; synthesize again.
        Some(SessionPhase::Synthesis) if checkpoint.pending_delta.is_none() => Step::Synthesize(round),
        Some(SessionPhase::Synthesis) => Step::Resolve(round),
        Some(SessionPhase::Resolution) if round < TOTAL_ROUNDS => Step::Collect(round + 1),
        Some(SessionPhase::Resolution) => Step::Finalize,
        Some(SessionPhase::Finalization) => Step::Done,
    }
}

/// Progress emission for one session.
#[derive(Clone)]
struct Emitter {
    session_id: Uuid,
    sink: Option<ProgressSink>,
}

impl Emitter {
    fn emit(&self, kind: ProgressKind, round: u32, message: impl Into<String>) {
        if let Some(sink) = &self.sink {
            sink.emit(ProgressEvent::new(kind, self.session_id, round, message));
        }
    }

    fn emit_agent(&self, kind: ProgressKind, round: u32, agent_id: &str, message: impl Into<String>) {
        if let Some(sink) = &self.sink {
            sink.emit(ProgressEvent::new(kind, self.session_id, round, message).with_agent(agent_id));
        }
    }
}

type Registry = Mutex<HashMap<Uuid, CancellationToken>>;

/// Removes a session from the registry when its run ends.
struct ActiveSession<'a> {
    registry: &'a Registry,
    session_id: Uuid,
    cancel: CancellationToken,
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);
    }
}

/// Runs generation sessions against a checkpoint store and an agent pool.
///
/// Sessions are independent; the only state shared between them is the
/// registry of sessions running in this process, used for cancellation.
pub struct Orchestrator {
    store: Arc<dyn CheckpointStore>,
    agents: Arc<AgentPool>,
    config: OrchestratorConfig,
    sessions: Registry,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("agents", &self.agents)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(store: Arc<dyn CheckpointStore>, agents: AgentPool, config: OrchestratorConfig) -> Self {
        Self {
            store,
            agents: Arc::new(agents),
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Run a new session to completion, or continue
    /// `request.resume_session_id` when set.
    ///
    /// A session given to continue must exist, be non-terminal and have a
    /// valid checkpoint.
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerationOutcome, GenerationError> {
        request.context.validate()?;

        if let Some(session_id) = request.resume_session_id {
            let checkpoint = self.load(session_id).await?;
            if checkpoint.status.is_terminal() {
                return Err(GenerationError::SessionNotResumable {
                    session_id,
                    status: checkpoint.status,
                });
            }
            return self.run(checkpoint, request.progress).await;
        }

        let checkpoint = self.start_checkpoint(&request).await?;
        self.run(checkpoint, request.progress).await
    }

    /// Validate the request and persist a pending session without running
    /// it. Run it later with [`resume_session`](Self::resume_session).
    pub async fn create_session(&self, request: &GenerateRequest) -> Result<Uuid, GenerationError> {
        request.context.validate()?;
        Ok(self.start_checkpoint(request).await?.session_id)
    }

    async fn start_checkpoint(&self, request: &GenerateRequest) -> Result<Checkpoint, GenerationError> {
        let session_id = Uuid::new_v4();
        let mut checkpoint = Checkpoint::new(
            session_id,
            request.user_id.clone(),
            request.correlation_id.clone(),
            request.context.clone(),
            request.upstream_insights.clone(),
        );
        self.save(&mut checkpoint).await?;
        info!(
            session_id = %session_id,
            user_id = %request.user_id,
            agents = self.agents.len(),
            "created generation session"
        );
        Ok(checkpoint)
    }

    /// Continue a stored session from its last checkpoint.
    ///
    /// A completed session returns its stored program without running
    /// anything. A failed session is rejected.
    pub async fn resume_session(
        &self,
        session_id: Uuid,
        progress: Option<ProgressSink>,
    ) -> Result<GenerationOutcome, GenerationError> {
        let checkpoint = self.load(session_id).await?;
        match checkpoint.status {
            SessionStatus::Failed => Err(GenerationError::SessionNotResumable {
                session_id,
                status: checkpoint.status,
            }),
            SessionStatus::Completed => {
                info!(session_id = %session_id, "session already completed, returning stored program");
                outcome(&checkpoint)
            }
            _ => {
                info!(
                    session_id = %session_id,
                    round = checkpoint.round_index,
                    phase = ?checkpoint.phase,
                    "resuming session"
                );
                self.run(checkpoint, progress).await
            }
        }
    }

    /// Signal a running session to stop. Returns `false` when the session
    /// is not running in this process.
    ///
    /// Agents already analyzing are not interrupted; their results are
    /// discarded. The session keeps its last checkpoint and can be resumed.
    pub fn cancel(&self, session_id: Uuid) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        match sessions.get(&session_id) {
            Some(token) => {
                info!(session_id = %session_id, "cancelling session");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether the session is currently running in this process.
    pub fn is_running(&self, session_id: Uuid) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&session_id)
    }

    /// Stored status of a session.
    pub async fn session_status(&self, session_id: Uuid) -> Result<SessionSummary, GenerationError> {
        Ok(self.load(session_id).await?.summary())
    }

    pub async fn list_sessions(&self, user_id: Option<&str>) -> Result<Vec<SessionSummary>, GenerationError> {
        Ok(self.store.list_sessions(user_id).await?)
    }

    /// The running or resumable session submitted under `correlation_id`.
    pub async fn find_active_session(&self, correlation_id: &str) -> Result<Option<SessionSummary>, GenerationError> {
        Ok(self.store.find_active_session(correlation_id).await?)
    }

    async fn load(&self, session_id: Uuid) -> Result<Checkpoint, GenerationError> {
        match self.store.load_checkpoint(session_id).await {
            Ok(Some(checkpoint)) => Ok(checkpoint),
            Ok(None) => Err(GenerationError::SessionNotFound(session_id)),
            Err(e) => match e.downcast_ref::<CheckpointError>() {
                Some(invalid) => Err(GenerationError::InvalidCheckpoint {
                    session_id,
                    reason: invalid.to_string(),
                }),
                None => Err(GenerationError::Store(e)),
            },
        }
    }

    async fn save(&self, checkpoint: &mut Checkpoint) -> Result<(), GenerationError> {
        checkpoint.seal().map_err(anyhow::Error::from)?;
        self.store
            .save_checkpoint(checkpoint)
            .await
            .with_context(|| format!("failed to save checkpoint for session {}", checkpoint.session_id))?;
        Ok(())
    }

    fn register(&self, session_id: Uuid) -> Result<ActiveSession<'_>, GenerationError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&session_id) {
            return Err(GenerationError::SessionBusy(session_id));
        }
        let cancel = CancellationToken::new();
        sessions.insert(session_id, cancel.clone());
        Ok(ActiveSession {
            registry: &self.sessions,
            session_id,
            cancel,
        })
    }

    async fn run(
        &self,
        mut checkpoint: Checkpoint,
        progress: Option<ProgressSink>,
    ) -> Result<GenerationOutcome, GenerationError> {
        let session_id = checkpoint.session_id;
        let active = self.register(session_id)?;
        let emitter = Emitter {
            session_id,
            sink: progress,
        };

        loop {
            if active.cancel.is_cancelled() {
                info!(session_id = %session_id, "session cancelled");
                return Err(GenerationError::Cancelled(session_id));
            }
            match next_step(&checkpoint) {
                Step::Collect(round) => self.collect(&mut checkpoint, round, &emitter, &active.cancel).await?,
                Step::Synthesize(round) => self.synthesize(&mut checkpoint, round, &emitter).await?,
                Step::Resolve(round) => self.resolve(&mut checkpoint, round, &emitter).await?,
                Step::Finalize => self.finalize(&mut checkpoint, &emitter).await?,
                Step::Done => break,
            }
        }

        let outcome = outcome(&checkpoint)?;
        info!(
            session_id = %session_id,
            workstreams = outcome.program.workstreams.len(),
            total_months = outcome.program.timeline.total_months,
            knowledge_emitted = outcome.knowledge.stats.emitted,
            "session completed"
        );
        emitter.emit(ProgressKind::Completed, TOTAL_ROUNDS, "Program generation complete");
        Ok(outcome)
    }

    /// Move the session to `to`, failing it if the edge is not allowed.
    async fn advance(
        &self,
        checkpoint: &mut Checkpoint,
        to: SessionStatus,
        phase: SessionPhase,
        round: u32,
        emitter: &Emitter,
    ) -> Result<(), GenerationError> {
        let session_id = checkpoint.session_id;
        if let Err(e) = SessionStateMachine::transition(session_id, &mut checkpoint.status, to) {
            return Err(self.fail_session(checkpoint, phase, round, e.to_string(), emitter).await);
        }
        Ok(())
    }

    async fn collect(
        &self,
        checkpoint: &mut Checkpoint,
        round: u32,
        emitter: &Emitter,
        cancel: &CancellationToken,
    ) -> Result<(), GenerationError> {
        let session_id = checkpoint.session_id;
        let Some(spec) = round_spec(round) else {
            let reason = format!("round {round} is outside 1..={TOTAL_ROUNDS}");
            return Err(self.fail_session(checkpoint, SessionPhase::Collection, round, reason, emitter).await);
        };

        self.advance(checkpoint, SessionStatus::Running, SessionPhase::Collection, round, emitter)
            .await?;
        self.save(checkpoint).await?;
        info!(session_id = %session_id, round, name = spec.name, "round started");
        emitter.emit(ProgressKind::RoundStart, round, format!("Round {round}: {}", spec.name));

        let input = AgentInput {
            round: spec,
            context: Arc::new(checkpoint.context.clone()),
            insights: (round == 1).then(|| Arc::new(checkpoint.insights.clone())),
            program_so_far: Arc::new(checkpoint.program_so_far.clone()),
            prior_outputs: Arc::new(checkpoint.agent_log.clone()),
        };

        // Outputs logged before an interruption stand; those agents are not asked again.
        let logged = match self.store.load_agent_outputs(session_id, round).await {
            Ok(logged) => logged,
            Err(e) => {
                let reason = format!("failed to read agent outputs: {e:#}");
                return Err(self.fail_session(checkpoint, SessionPhase::Collection, round, reason, emitter).await);
            }
        };
        if !logged.is_empty() {
            info!(session_id = %session_id, round, reused = logged.len(), "reusing logged agent outputs");
        }
        let logged_ids: HashSet<&str> = logged.iter().map(|o| o.agent_id.as_str()).collect();

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_agents.max(1)));
        let timeout = self.config.agent_timeout;
        let mut pending = FuturesUnordered::new();
        for agent in self.agents.agents() {
            if logged_ids.contains(agent.id()) {
                continue;
            }
            let agent = Arc::clone(agent);
            let agent_id = agent.id().to_string();
            let input = input.clone();
            let semaphore = Arc::clone(&semaphore);
            let emitter = emitter.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| anyhow!("agent semaphore closed"))?;
                emitter.emit_agent(
                    ProgressKind::AgentStart,
                    round,
                    agent.id(),
                    format!("{} analyzing", agent.role()),
                );
                match tokio::time::timeout(timeout, agent.analyze(&input)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("timed out after {}ms", timeout.as_millis())),
                }
            });
            pending.push(async move { (agent_id, handle.await) });
        }

        let mut outputs = Vec::new();
        let mut failures = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(session_id = %session_id, round, "session cancelled, discarding in-flight agent results");
                    return Err(GenerationError::Cancelled(session_id));
                }
                next = pending.next() => {
                    let Some((agent_id, joined)) = next else {
                        break;
                    };
                    let result = joined.unwrap_or_else(|e| Err(anyhow!("agent task panicked: {e}")));
                    match result {
                        Ok(analysis) => {
                            let confidence = if analysis.confidence.is_finite() {
                                analysis.confidence.clamp(0.0, 1.0)
                            } else {
                                0.0
                            };
                            emitter.emit_agent(
                                ProgressKind::AgentComplete,
                                round,
                                &agent_id,
                                format!("{} contribution(s)", analysis.contributions.len()),
                            );
                            outputs.push(AgentOutput {
                                agent_id,
                                round,
                                contributions: analysis.contributions,
                                confidence,
                                reasoning: analysis.reasoning,
                                recorded_at: Utc::now(),
                            });
                        }
                        Err(e) => {
                            warn!(session_id = %session_id, round, agent_id = %agent_id, error = %e, "agent failed");
                            emitter.emit_agent(ProgressKind::AgentFailed, round, &agent_id, format!("{e:#}"));
                            failures.push(format!("{agent_id}: {e:#}"));
                        }
                    }
                }
            }
        }

        if !outputs.is_empty() {
            if let Err(e) = self.store.append_agent_outputs(session_id, &outputs).await {
                let reason = format!("failed to record agent outputs: {e:#}");
                return Err(self.fail_session(checkpoint, SessionPhase::Collection, round, reason, emitter).await);
            }
        }
        let fresh = outputs.len();

        // The log is authoritative: synthesize exactly what it holds.
        let outputs = if fresh == 0 {
            logged
        } else {
            match self.store.load_agent_outputs(session_id, round).await {
                Ok(outputs) => outputs,
                Err(e) => {
                    let reason = format!("failed to read agent outputs: {e:#}");
                    return Err(self.fail_session(checkpoint, SessionPhase::Collection, round, reason, emitter).await);
                }
            }
        };

        if outputs.is_empty() {
            let reason = if failures.is_empty() {
                format!("no agents available for round {round}")
            } else {
                format!("all agents failed in round {round}: {}", failures.join("; "))
            };
            return Err(self.fail_session(checkpoint, SessionPhase::Collection, round, reason, emitter).await);
        }

        info!(
            session_id = %session_id,
            round,
            succeeded = fresh,
            reused = outputs.len().saturating_sub(fresh),
            failed = failures.len(),
            "agent outputs collected"
        );

        checkpoint.agent_log.retain(|o| o.round != round);
        checkpoint.agent_log.extend(outputs);
        checkpoint.round_index = round;
        checkpoint.phase = Some(SessionPhase::Collection);
        self.save(checkpoint).await
    }

    async fn synthesize(&self, checkpoint: &mut Checkpoint, round: u32, emitter: &Emitter) -> Result<(), GenerationError> {
        self.advance(checkpoint, SessionStatus::Synthesizing, SessionPhase::Synthesis, round, emitter)
            .await?;
        emitter.emit(ProgressKind::SynthesisStart, round, "Synthesizing agent outputs");

        let delta = synthesize(round, &checkpoint.outputs_for_round(round));
        info!(session_id = %checkpoint.session_id, round, entities = delta.entries.len(), "round synthesized");
        let entities = delta.entries.len();
        checkpoint.pending_delta = Some(delta);
        checkpoint.phase = Some(SessionPhase::Synthesis);
        self.save(checkpoint).await?;

        emitter.emit(ProgressKind::SynthesisComplete, round, format!("{entities} entities proposed"));
        Ok(())
    }

    async fn resolve(&self, checkpoint: &mut Checkpoint, round: u32, emitter: &Emitter) -> Result<(), GenerationError> {
        self.advance(
            checkpoint,
            SessionStatus::ResolvingConflicts,
            SessionPhase::Resolution,
            round,
            emitter,
        )
        .await?;
        emitter.emit(ProgressKind::ConflictResolutionStart, round, "Resolving conflicts");

        let Some(delta) = checkpoint.pending_delta.clone() else {
            let reason = format!("no synthesized delta for round {round}");
            return Err(self.fail_session(checkpoint, SessionPhase::Resolution, round, reason, emitter).await);
        };

        let mut draft = checkpoint.program_so_far.clone();
        let summary = match resolve(&mut draft, &delta, &checkpoint.context) {
            Ok(summary) => summary,
            Err(conflict) => {
                let reason = format!("structural conflict: {conflict}");
                return Err(self.fail_session(checkpoint, SessionPhase::Resolution, round, reason, emitter).await);
            }
        };
        draft.log_round(round, &checkpoint.outputs_for_round(round));

        checkpoint.program_so_far = draft;
        checkpoint.pending_delta = None;
        checkpoint.phase = Some(SessionPhase::Resolution);
        self.save(checkpoint).await?;

        info!(
            session_id = %checkpoint.session_id,
            round,
            accepted = summary.accepted,
            conflicts = summary.conflicts,
            "round resolved"
        );
        emitter.emit(
            ProgressKind::ConflictResolutionComplete,
            round,
            format!("{} accepted, {} conflicts resolved", summary.accepted, summary.conflicts),
        );
        emitter.emit(ProgressKind::RoundComplete, round, format!("Round {round} complete"));
        Ok(())
    }

    async fn finalize(&self, checkpoint: &mut Checkpoint, emitter: &Emitter) -> Result<(), GenerationError> {
        let round = checkpoint.round_index;
        self.advance(checkpoint, SessionStatus::Finalizing, SessionPhase::Finalization, round, emitter)
            .await?;
        emitter.emit(ProgressKind::Finalizing, round, "Assembling program");

        let program = match finalize::assemble(
            checkpoint.session_id,
            &checkpoint.program_so_far,
            &checkpoint.context,
            &checkpoint.insights,
        ) {
            Ok(program) => program,
            Err(conflict) => {
                let reason = format!("structural conflict: {conflict}");
                return Err(self.fail_session(checkpoint, SessionPhase::Finalization, round, reason, emitter).await);
            }
        };
        if program.timeline.timeline_violation {
            warn!(
                session_id = %checkpoint.session_id,
                effective_duration = program.timeline.effective_duration,
                total_months = program.timeline.total_months,
                "program exceeds the timeline constraint"
            );
        }

        checkpoint.final_program = Some(program);
        self.advance(checkpoint, SessionStatus::Completed, SessionPhase::Finalization, round, emitter)
            .await?;
        checkpoint.phase = Some(SessionPhase::Finalization);
        self.save(checkpoint).await
    }

    /// Persist the session as failed and build the error to return.
    async fn fail_session(
        &self,
        checkpoint: &mut Checkpoint,
        phase: SessionPhase,
        round: u32,
        reason: String,
        emitter: &Emitter,
    ) -> GenerationError {
        let session_id = checkpoint.session_id;
        error!(session_id = %session_id, round, phase = %phase, reason = %reason, "session failed");

        if SessionStateMachine::transition(session_id, &mut checkpoint.status, SessionStatus::Failed).is_err() {
            return GenerationError::SessionNotResumable {
                session_id,
                status: checkpoint.status,
            };
        }
        checkpoint.failure = Some(FailureRecord {
            phase,
            round,
            reason: reason.clone(),
        });
        if let Err(e) = self.save(checkpoint).await {
            return e;
        }

        emitter.emit(ProgressKind::Error, round, reason.clone());
        GenerationError::SessionFailed {
            session_id,
            phase,
            round,
            reason,
        }
    }
}

fn outcome(checkpoint: &Checkpoint) -> Result<GenerationOutcome, GenerationError> {
    let Some(program) = checkpoint.final_program.clone() else {
        return Err(GenerationError::InvalidCheckpoint {
            session_id: checkpoint.session_id,
            reason: "completed checkpoint has no program".into(),
        });
    };
    let knowledge = curate(candidates_from_program(&program));
    Ok(GenerationOutcome {
        session_id: checkpoint.session_id,
        program,
        knowledge,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::test_support::sealed;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::synthesis::RoundDelta;

    #[test]
    fn step_follows_last_completed_phase() {
        let mut cp = sealed("user-1");
        assert_eq!(next_step(&cp), Step::Collect(1));

        cp.round_index = 3;
        cp.phase = Some(SessionPhase::Collection);
        assert_eq!(next_step(&cp), Step::Synthesize(3));

        cp.phase = Some(SessionPhase::Synthesis);
        assert_eq!(next_step(&cp), Step::Synthesize(3));
        cp.pending_delta = Some(RoundDelta {
            round: 3,
            entries: Default::default(),
        });
        assert_eq!(next_step(&cp), Step::Resolve(3));

        cp.phase = Some(SessionPhase::Resolution);
        assert_eq!(next_step(&cp), Step::Collect(4));

        cp.round_index = TOTAL_ROUNDS;
        assert_eq!(next_step(&cp), Step::Finalize);

        cp.phase = Some(SessionPhase::Finalization);
        assert_eq!(next_step(&cp), Step::Done);
    }

    #[test]
    fn registry_rejects_second_run_and_clears_on_drop() {
        let orchestrator = Orchestrator::new(
            Arc::new(InMemoryCheckpointStore::new()),
            AgentPool::new(),
            OrchestratorConfig::default(),
        );
        let id = Uuid::new_v4();
        let active = orchestrator.register(id).unwrap();
        assert!(matches!(orchestrator.register(id), Err(GenerationError::SessionBusy(_))));
        assert!(orchestrator.cancel(id));
        assert!(active.cancel.is_cancelled());

        drop(active);
        assert!(!orchestrator.is_running(id));
        assert!(!orchestrator.cancel(id));
    }

    #[tokio::test]
    async fn empty_pool_fails_the_session() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let orchestrator = Orchestrator::new(store.clone(), AgentPool::new(), OrchestratorConfig::default());
        let request = GenerateRequest::new("user-1", crate::checkpoint::test_support::context());

        let (session_id, phase, round) = match orchestrator.generate(request).await {
            Err(GenerationError::SessionFailed { session_id, phase, round, .. }) => (session_id, phase, round),
            other => panic!("expected session failure, got {other:?}"),
        };
        assert_eq!((phase, round), (SessionPhase::Collection, 1));

        let summary = orchestrator.session_status(session_id).await.unwrap();
        assert_eq!(summary.status, SessionStatus::Failed);
        assert!(summary.failure_reason.unwrap().contains("no agents"));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let orchestrator = Orchestrator::new(
            Arc::new(InMemoryCheckpointStore::new()),
            AgentPool::standard(),
            OrchestratorConfig::default(),
        );
        let id = Uuid::new_v4();
        assert!(matches!(
            orchestrator.resume_session(id, None).await,
            Err(GenerationError::SessionNotFound(missing)) if missing == id
        ));
    }
}
