//! Program sections and the finalized [`Program`] aggregate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::finance::FinancialPlan;

/// Latest month a workstream, deliverable or timeline bound may use.
pub const MAX_MONTH: u32 = 1200;

/// A unit of work produced by a workstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deliverable {
    pub id: String,
    pub name: String,
    pub due_month: u32,
    /// Person-months.
    pub effort_estimate: f64,
}

/// A stream of work spanning `start_month..=end_month` (0-indexed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workstream {
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner: String,
    #[serde(default)]
    pub deliverables: Vec<Deliverable>,
    pub start_month: u32,
    pub end_month: u32,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub confidence: f64,
}

impl Workstream {
    /// Number of months the workstream occupies.
    pub fn duration(&self) -> u32 {
        self.end_month.saturating_sub(self.start_month) + 1
    }

    /// Move the workstream (and its deliverables) so it starts at `start`.
    pub fn shift_to(&mut self, start: u32) {
        let duration = self.duration();
        let delta = i64::from(start) - i64::from(self.start_month);
        self.start_month = start;
        self.end_month = start.saturating_add(duration - 1);
        for deliverable in &mut self.deliverables {
            let due = i64::from(deliverable.due_month) + delta;
            deliverable.due_month = u32::try_from(due.max(0)).unwrap_or(0);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub name: String,
    pub start_month: u32,
    pub end_month: u32,
    pub workstream_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: String,
    pub name: String,
    pub due_month: u32,
    pub deliverable_ids: Vec<String>,
}

/// Month-indexed schedule computed from the workstream graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub total_months: u32,
    /// Length implied by workstream end months alone.
    pub effective_duration: u32,
    pub phases: Vec<Phase>,
    pub timeline_violation: bool,
    pub milestones: Vec<Milestone>,
    pub critical_path: Vec<String>,
}

/// A staffed role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRole {
    pub role: String,
    #[serde(default)]
    pub skills: Vec<String>,
    /// Full-time equivalents.
    pub allocation: f64,
    pub cost_per_month: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePlan {
    pub roles: Vec<ResourceRole>,
    pub total_headcount: f64,
    /// Cost of all roles over the scheduled months.
    pub total_cost: f64,
}

impl ResourcePlan {
    pub fn from_roles(roles: Vec<ResourceRole>, total_months: u32) -> Self {
        let total_headcount = roles.iter().map(|r| r.allocation).sum();
        let monthly: f64 = roles.iter().map(|r| r.cost_per_month * r.allocation).sum();
        Self {
            roles,
            total_headcount,
            total_cost: monthly * f64::from(total_months),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Risk {
    pub id: String,
    pub description: String,
    pub probability: Level,
    pub impact: Level,
    pub mitigation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskRegister {
    pub risks: Vec<Risk>,
    pub overall_level: Level,
}

impl RiskRegister {
    /// Build a register, rating it `high` when more than half of the risks
    /// have high impact and `low` when more than half have low impact.
    pub fn from_risks(risks: Vec<Risk>) -> Self {
        let half = risks.len() as f64 / 2.0;
        let high = risks.iter().filter(|r| r.impact == Level::High).count() as f64;
        let low = risks.iter().filter(|r| r.impact == Level::Low).count() as f64;
        let overall_level = if high > half {
            Level::High
        } else if low > half {
            Level::Low
        } else {
            Level::Medium
        };
        Self {
            risks,
            overall_level,
        }
    }
}

/// A governance decision agreed during a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub topic: String,
    pub decision: String,
    pub rationale: String,
    pub made_by: String,
    #[serde(default)]
    pub endorsed_by: Vec<String>,
    pub round: u32,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Governance {
    pub decisions: Vec<Decision>,
}

/// How often a budget line is incurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostFrequency {
    OneTime,
    Monthly,
    Quarterly,
    Annual,
}

/// A proposed cost, keyed by category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetLine {
    pub category: String,
    pub amount: f64,
    pub frequency: CostFrequency,
    #[serde(default)]
    pub description: String,
}

/// One agent's reasoning for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub round: u32,
    pub agent_id: String,
    pub reasoning: String,
}

/// A contribution that lost conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverruledContribution {
    pub agent_id: String,
    pub round: u32,
    pub confidence: f64,
    pub value: serde_json::Value,
}

/// Which precedence rule decided a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRule {
    UserConstraint,
    Confidence,
    Recency,
    AgentOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictAnnotation {
    pub entity_key: String,
    pub round: u32,
    pub winner_agent_id: String,
    pub winner_round: u32,
    pub winner_confidence: f64,
    pub rule: ResolutionRule,
    pub overruled: Vec<OverruledContribution>,
}

/// A workstream moved so it starts after its dependencies end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleShift {
    pub workstream_id: String,
    pub from_start: u32,
    pub to_start: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Annotation {
    Conflict(ConflictAnnotation),
    ScheduleShift(ScheduleShift),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramStatus {
    Draft,
    Finalized,
}

/// The generated execution program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub session_id: Uuid,
    pub status: ProgramStatus,
    pub workstreams: Vec<Workstream>,
    pub timeline: Timeline,
    pub financial_plan: FinancialPlan,
    pub resource_plan: ResourcePlan,
    pub risk_register: RiskRegister,
    pub governance: Governance,
    pub annotations: Vec<Annotation>,
    pub conversation_log: Vec<ConversationEntry>,
    pub overall_confidence: f64,
}

/// Every field of [`Program`] except the owning session.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgramContent<'a> {
    status: ProgramStatus,
    workstreams: &'a [Workstream],
    timeline: &'a Timeline,
    financial_plan: &'a FinancialPlan,
    resource_plan: &'a ResourcePlan,
    risk_register: &'a RiskRegister,
    governance: &'a Governance,
    annotations: &'a [Annotation],
    conversation_log: &'a [ConversationEntry],
    overall_confidence: f64,
}

impl Program {
    /// SHA-256 over the program content, independent of the session id.
    ///
    /// Two runs over identical inputs produce the same digest.
    pub fn content_digest(&self) -> Result<String, serde_json::Error> {
        let content = ProgramContent {
            status: self.status,
            workstreams: &self.workstreams,
            timeline: &self.timeline,
            financial_plan: &self.financial_plan,
            resource_plan: &self.resource_plan,
            risk_register: &self.risk_register,
            governance: &self.governance,
            annotations: &self.annotations,
            conversation_log: &self.conversation_log,
            overall_confidence: self.overall_confidence,
        };
        let bytes = serde_json::to_vec(&content)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}
