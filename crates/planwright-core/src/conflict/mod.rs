//! Conflict resolution: reconciling a round delta with the accepted program.
//!
//! For every entity the delta touches, the candidates are the round's
//! proposals plus the value already accepted. The winner is chosen by a
//! fixed precedence:
//!
//! 1. a contribution satisfying an explicit user constraint,
//! 2. higher confidence,
//! 3. later round,
//! 4. lower agent id.
//!
//! Losing values are kept as [`ConflictAnnotation`]s. Dependency cycles
//! cannot be resolved this way and surface as [`StructuralConflict`].

mod graph;

use std::cmp::Ordering;

use tracing::debug;

pub use graph::{StructuralConflict, check_dependency_graph};
pub(crate) use graph::topological_order;

use crate::model::{BusinessContext, ConflictAnnotation, OverruledContribution, ResolutionRule};
use crate::synthesis::{Candidate, Contribution, ProgramDraft, RoundDelta};

/// Counts from one resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolutionSummary {
    pub accepted: usize,
    pub conflicts: usize,
}

/// Whether a contribution satisfies the user's declared constraints.
///
/// `None` when no declared constraint applies to it.
pub fn matches_constraint(contribution: &Contribution, context: &BusinessContext) -> Option<bool> {
    match contribution {
        Contribution::Workstream(w) => context
            .timeline_range()
            .map(|range| w.end_month + 1 <= range.max),
        Contribution::Resource(r) => context.max_headcount().map(|max| r.allocation <= max),
        Contribution::BudgetLine(b) => context.budget_range().map(|range| b.amount <= range.max),
        Contribution::Risk(_) | Contribution::Decision(_) => None,
    }
}

fn constraint_rank(candidate: &Candidate, context: &BusinessContext) -> u8 {
    u8::from(matches_constraint(&candidate.contribution, context) == Some(true))
}

/// Total order over candidates; `Greater` means `a` beats `b`.
pub fn precedence(a: &Candidate, b: &Candidate, context: &BusinessContext) -> Ordering {
    constraint_rank(a, context)
        .cmp(&constraint_rank(b, context))
        .then_with(|| a.confidence.total_cmp(&b.confidence))
        .then_with(|| a.round.cmp(&b.round))
        .then_with(|| b.agent_id.cmp(&a.agent_id))
}

fn deciding_rule(winner: &Candidate, runner_up: &Candidate, context: &BusinessContext) -> ResolutionRule {
    if constraint_rank(winner, context) != constraint_rank(runner_up, context) {
        ResolutionRule::UserConstraint
    } else if winner.confidence != runner_up.confidence {
        ResolutionRule::Confidence
    } else if winner.round != runner_up.round {
        ResolutionRule::Recency
    } else {
        ResolutionRule::AgentOrder
    }
}

/// Apply `delta` to `draft`, resolving every conflicting entity.
///
/// On a structural conflict `draft` may be partially updated; callers
/// resolve against a copy when they need to keep the previous state.
pub fn resolve(
    draft: &mut ProgramDraft,
    delta: &RoundDelta,
    context: &BusinessContext,
) -> Result<ResolutionSummary, StructuralConflict> {
    let mut summary = ResolutionSummary::default();

    for (key, entry) in &delta.entries {
        let mut candidates: Vec<&Candidate> = entry.candidates().collect();
        if let Some(existing) = draft.accepted(key) {
            candidates.push(existing);
        }
        candidates.sort_by(|a, b| precedence(b, a, context));

        let Some((&winner, rest)) = candidates.split_first() else {
            continue;
        };
        let losers: Vec<&Candidate> = rest
            .iter()
            .copied()
            .filter(|c| c.contribution != winner.contribution)
            .collect();

        let annotation = losers.first().map(|&runner_up| {
            let rule = deciding_rule(winner, runner_up, context);
            debug!(
                entity = %key,
                winner = %winner.agent_id,
                overruled = losers.len(),
                ?rule,
                "resolved conflict"
            );
            ConflictAnnotation {
                entity_key: key.to_string(),
                round: delta.round,
                winner_agent_id: winner.agent_id.clone(),
                winner_round: winner.round,
                winner_confidence: winner.confidence,
                rule,
                overruled: losers
                    .iter()
                    .map(|c| OverruledContribution {
                        agent_id: c.agent_id.clone(),
                        round: c.round,
                        confidence: c.confidence,
                        value: serde_json::to_value(&c.contribution)
                            .unwrap_or(serde_json::Value::Null),
                    })
                    .collect(),
            }
        });
        let winner = winner.clone();

        if let Some(annotation) = annotation {
            summary.conflicts += 1;
            draft.annotate(annotation);
        }
        draft.accept(key.clone(), winner);
        summary.accepted += 1;
    }

    check_dependency_graph(&draft.workstreams(), false)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Constraints, Scale, TimelineRange};
    use crate::synthesis::test_support::{budget_line, output, workstream};
    use crate::synthesis::{AgentOutput, EntityKey, SectionKind, synthesize};

    fn context(timeline_max: Option<u32>) -> BusinessContext {
        BusinessContext {
            name: "Acme".into(),
            business_type: "saas".into(),
            scale: Scale::Smb,
            description: "analytics".into(),
            industry: None,
            keywords: vec![],
            constraints: timeline_max.map(|max| Constraints {
                timeline_range: Some(TimelineRange { min: 1, max }),
                ..Default::default()
            }),
        }
    }

    fn ws_key(id: &str) -> EntityKey {
        EntityKey::new(SectionKind::Workstream, id)
    }

    #[test]
    fn higher_confidence_wins_and_loser_is_annotated() {
        let delta = synthesize(
            2,
            &[
                output("a", 2, 0.6, vec![Contribution::Workstream(workstream("ws-1", 0, 3, &[]))]),
                output("b", 2, 0.9, vec![Contribution::Workstream(workstream("ws-1", 0, 8, &[]))]),
            ],
        );
        let mut draft = ProgramDraft::new();
        let summary = resolve(&mut draft, &delta, &context(None)).unwrap();

        assert_eq!(summary, ResolutionSummary { accepted: 1, conflicts: 1 });
        assert_eq!(draft.accepted(&ws_key("ws-1")).unwrap().agent_id, "b");
        let annotation = &draft.annotations()[0];
        assert_eq!(annotation.rule, ResolutionRule::Confidence);
        assert_eq!(annotation.overruled[0].agent_id, "a");
        assert_eq!(annotation.overruled[0].value["endMonth"], 3);
    }

    #[test]
    fn user_constraint_beats_confidence() {
        // Timeline max 6: only the shorter workstream fits.
        let delta = synthesize(
            2,
            &[
                output("a", 2, 0.5, vec![Contribution::Workstream(workstream("ws-1", 0, 4, &[]))]),
                output("b", 2, 0.95, vec![Contribution::Workstream(workstream("ws-1", 0, 9, &[]))]),
            ],
        );
        let mut draft = ProgramDraft::new();
        resolve(&mut draft, &delta, &context(Some(6))).unwrap();

        assert_eq!(draft.accepted(&ws_key("ws-1")).unwrap().agent_id, "a");
        assert_eq!(draft.annotations()[0].rule, ResolutionRule::UserConstraint);
    }

    #[test]
    fn equal_confidence_prefers_later_round() {
        let ctx = context(None);
        let mut draft = ProgramDraft::new();
        let first = synthesize(
            2,
            &[output("z", 2, 0.8, vec![Contribution::Workstream(workstream("ws-1", 0, 3, &[]))])],
        );
        resolve(&mut draft, &first, &ctx).unwrap();

        let second = synthesize(
            3,
            &[output("a", 3, 0.8, vec![Contribution::Workstream(workstream("ws-1", 1, 4, &[]))])],
        );
        resolve(&mut draft, &second, &ctx).unwrap();

        let accepted = draft.accepted(&ws_key("ws-1")).unwrap();
        assert_eq!((accepted.agent_id.as_str(), accepted.round), ("a", 3));
        assert_eq!(draft.annotations()[0].rule, ResolutionRule::Recency);
    }

    #[test]
    fn lower_confidence_revision_does_not_replace_accepted_value() {
        let ctx = context(None);
        let mut draft = ProgramDraft::new();
        resolve(
            &mut draft,
            &synthesize(6, &[output("a", 6, 0.9, vec![Contribution::BudgetLine(budget_line("Technology", 50.0))])]),
            &ctx,
        )
        .unwrap();
        resolve(
            &mut draft,
            &synthesize(7, &[output("b", 7, 0.4, vec![Contribution::BudgetLine(budget_line("Technology", 80.0))])]),
            &ctx,
        )
        .unwrap();

        let key = EntityKey::new(SectionKind::BudgetLine, "Technology");
        assert_eq!(draft.accepted(&key).unwrap().agent_id, "a");
        assert_eq!(draft.annotations()[0].overruled[0].agent_id, "b");
    }

    #[test]
    fn identical_values_are_not_conflicts() {
        let value = Contribution::Workstream(workstream("ws-1", 0, 3, &[]));
        let delta = synthesize(
            2,
            &[output("a", 2, 0.7, vec![value.clone()]), output("b", 2, 0.9, vec![value])],
        );
        let mut draft = ProgramDraft::new();
        let summary = resolve(&mut draft, &delta, &context(None)).unwrap();
        assert_eq!(summary.conflicts, 0);
        assert!(draft.annotations().is_empty());
    }

    #[test]
    fn tie_break_is_reproducible() {
        let outputs = vec![
            output("beta", 2, 0.8, vec![Contribution::Workstream(workstream("ws-1", 0, 5, &[]))]),
            output("alpha", 2, 0.8, vec![Contribution::Workstream(workstream("ws-1", 0, 7, &[]))]),
        ];
        let run = |outputs: &[AgentOutput]| {
            let mut draft = ProgramDraft::new();
            resolve(&mut draft, &synthesize(2, outputs), &context(None)).unwrap();
            draft
        };
        let mut reversed = outputs.clone();
        reversed.reverse();

        let a = run(&outputs);
        let b = run(&reversed);
        assert_eq!(a, b);
        assert_eq!(a.accepted(&ws_key("ws-1")).unwrap().agent_id, "alpha");
        assert_eq!(a.annotations()[0].rule, ResolutionRule::AgentOrder);
    }

    #[test]
    fn cycle_escalates() {
        let delta = synthesize(
            3,
            &[output(
                "a",
                3,
                0.8,
                vec![
                    Contribution::Workstream(workstream("ws-1", 0, 3, &["ws-2"])),
                    Contribution::Workstream(workstream("ws-2", 0, 3, &["ws-1"])),
                ],
            )],
        );
        let mut draft = ProgramDraft::new();
        let err = resolve(&mut draft, &delta, &context(None)).unwrap_err();
        assert!(matches!(err, StructuralConflict::Cycle(ids) if ids == ["ws-1", "ws-2"]));
    }
}
