//! Domain types shared across the engine.

pub mod context;
pub mod program;

pub use context::{
    BudgetRange, BusinessContext, ContextError, ContextFile, Constraints, FrameworkInsight,
    ResourceLimits, Scale, TimelineRange, UpstreamInsights, Urgency, load_context_file,
};
pub use program::{
    Annotation, BudgetLine, ConflictAnnotation, ConversationEntry, CostFrequency, Decision,
    Deliverable, Governance, Level, MAX_MONTH, Milestone, OverruledContribution, Phase, Program,
    ProgramStatus, ResolutionRule, ResourcePlan, ResourceRole, Risk, RiskRegister, ScheduleShift,
    Timeline, Workstream,
};
