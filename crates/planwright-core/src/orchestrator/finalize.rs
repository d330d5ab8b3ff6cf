//! Assembly of the final program from the accepted draft.

use uuid::Uuid;

use crate::conflict::{StructuralConflict, check_dependency_graph};
use crate::finance::synthesize_financial_plan;
use crate::model::{
    Annotation, BusinessContext, Governance, Program, ProgramStatus, ResourcePlan, RiskRegister,
    UpstreamInsights,
};
use crate::schedule::{align_to_dependencies, schedule};
use crate::synthesis::ProgramDraft;

/// Reported when no workstream carries a confidence.
const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Build the finalized [`Program`].
///
/// Fails on a dangling or cyclic workstream dependency. Workstreams that
/// start before a prerequisite ends are shifted and the shift is recorded
/// as an annotation.
pub(crate) fn assemble(
    session_id: Uuid,
    draft: &ProgramDraft,
    context: &BusinessContext,
    insights: &UpstreamInsights,
) -> Result<Program, StructuralConflict> {
    let sections = draft.sections();
    let mut workstreams = sections.workstreams;
    check_dependency_graph(&workstreams, true)?;

    let shifts = align_to_dependencies(&mut workstreams);
    let timeline = schedule(insights, &workstreams, context);

    let resource_plan = ResourcePlan::from_roles(sections.resources, timeline.total_months);
    let financial_plan = synthesize_financial_plan(
        &sections.budget_lines,
        &resource_plan,
        timeline.total_months,
        context.budget_range(),
    );

    let mut decisions = sections.decisions;
    decisions.sort_by(|a, b| a.round.cmp(&b.round).then_with(|| a.topic.cmp(&b.topic)));

    let annotations = draft
        .annotations()
        .iter()
        .cloned()
        .map(Annotation::Conflict)
        .chain(shifts.into_iter().map(Annotation::ScheduleShift))
        .collect();

    let overall_confidence = if workstreams.is_empty() {
        DEFAULT_CONFIDENCE
    } else {
        workstreams.iter().map(|w| w.confidence).sum::<f64>() / workstreams.len() as f64
    };

    Ok(Program {
        session_id,
        status: ProgramStatus::Finalized,
        workstreams,
        timeline,
        financial_plan,
        resource_plan,
        risk_register: RiskRegister::from_risks(sections.risks),
        governance: Governance { decisions },
        annotations,
        conversation_log: draft.conversation_log().to_vec(),
        overall_confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::test_support::context;
    use crate::conflict::resolve;
    use crate::synthesis::test_support::{budget_line, output, risk, workstream};
    use crate::synthesis::{Contribution, synthesize};

    fn draft(contributions: Vec<Contribution>) -> ProgramDraft {
        let mut draft = ProgramDraft::new();
        let delta = synthesize(2, &[output("a", 2, 0.8, contributions)]);
        resolve(&mut draft, &delta, &context()).unwrap();
        draft
    }

    #[test]
    fn misaligned_dependents_are_shifted_and_annotated() {
        let draft = draft(vec![
            Contribution::Workstream(workstream("ws-a", 0, 3, &[])),
            Contribution::Workstream(workstream("ws-b", 2, 5, &["ws-a"])),
        ]);
        let program = assemble(Uuid::new_v4(), &draft, &context(), &UpstreamInsights::default()).unwrap();

        let b = program.workstreams.iter().find(|w| w.id == "ws-b").unwrap();
        assert_eq!((b.start_month, b.end_month), (4, 7));
        assert_eq!(program.timeline.total_months, 8);
        assert!(program.annotations.iter().any(|a| matches!(
            a,
            Annotation::ScheduleShift(s) if s.workstream_id == "ws-b" && s.from_start == 2 && s.to_start == 4
        )));
    }

    #[test]
    fn dangling_dependency_fails_at_finalization() {
        let draft = draft(vec![Contribution::Workstream(workstream("ws-a", 0, 3, &["ws-missing"]))]);
        let err = assemble(Uuid::new_v4(), &draft, &context(), &UpstreamInsights::default()).unwrap_err();
        assert!(matches!(err, StructuralConflict::DanglingDependency { .. }));
    }

    #[test]
    fn costs_cover_lines_and_contingency() {
        let draft = draft(vec![
            Contribution::Workstream(workstream("ws-a", 0, 9, &[])),
            Contribution::BudgetLine(budget_line("Technology", 50_000.0)),
            Contribution::Risk(risk("risk-a")),
        ]);
        let program = assemble(Uuid::new_v4(), &draft, &context(), &UpstreamInsights::default()).unwrap();
        let plan = &program.financial_plan;
        assert_eq!(plan.cost_breakdown.len(), 1);
        assert!((plan.contingency - 5_000.0).abs() < 1e-6);
        assert!(plan.position().is_none());
        assert_eq!(program.risk_register.risks.len(), 1);
    }

    #[test]
    fn empty_draft_still_yields_a_program() {
        let program = assemble(Uuid::new_v4(), &ProgramDraft::new(), &context(), &UpstreamInsights::default()).unwrap();
        assert_eq!(program.timeline.total_months, 1);
        assert_eq!(program.overall_confidence, DEFAULT_CONFIDENCE);
    }
}
