//! Critical-path scheduler.
//!
//! [`schedule`] is a pure function from the workstream graph and the
//! user's timeline constraint to a [`Timeline`]. It never moves work to
//! hide an overrun: when the graph needs more months than the user
//! allows, the timeline is capped at the declared maximum and flagged.

use std::collections::{BTreeSet, HashMap};

use crate::conflict::topological_order;
use crate::model::{
    BusinessContext, Milestone, Phase, ScheduleShift, Timeline, UpstreamInsights, Workstream,
};

pub const BUFFER_PHASE_NAME: &str = "Stabilization & Buffer";

/// Minimum length of a work phase, in months.
const MIN_PHASE_MONTHS: u32 = 2;

/// Deliverables listed per milestone.
const MAX_MILESTONE_DELIVERABLES: usize = 5;

/// Months implied by the workstreams alone: `1 + max(endMonth)`.
///
/// An empty workstream set still occupies one month.
pub fn effective_duration(workstreams: &[Workstream]) -> u32 {
    workstreams
        .iter()
        .map(|w| w.end_month.saturating_add(1))
        .max()
        .unwrap_or(1)
}

/// Build the timeline for `workstreams` under the context's constraint.
pub fn schedule(
    insights: &UpstreamInsights,
    workstreams: &[Workstream],
    context: &BusinessContext,
) -> Timeline {
    let effective = effective_duration(workstreams);
    let mut phases = work_phases(insights, workstreams);
    let milestones = milestones(&phases, workstreams);

    let (total_months, timeline_violation) = match context.timeline_range() {
        None => (effective, false),
        Some(range) if effective < range.max => {
            phases.push(Phase {
                name: BUFFER_PHASE_NAME.into(),
                start_month: effective,
                end_month: range.max,
                workstream_ids: vec![],
            });
            (range.max, false)
        }
        Some(range) => (range.max, effective > range.max),
    };

    Timeline {
        total_months,
        effective_duration: effective,
        phases,
        timeline_violation,
        milestones,
        critical_path: critical_path(workstreams),
    }
}

/// Split `[min startMonth, max endMonth]` into consecutive phases of
/// `max(span / 3, 2)` months.
fn work_phases(insights: &UpstreamInsights, workstreams: &[Workstream]) -> Vec<Phase> {
    let Some(first) = workstreams.iter().map(|w| w.start_month).min() else {
        return vec![];
    };
    let last = workstreams.iter().map(|w| w.end_month).max().unwrap_or(first);
    let span = last.saturating_sub(first).saturating_add(1);
    let length = (span / 3).max(MIN_PHASE_MONTHS);

    let mut phases = Vec::new();
    let mut start = first;
    while start <= last {
        let end = start.saturating_add(length - 1).min(last);
        let index = phases.len();
        let name = insights
            .phase_labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("Phase {}", index + 1));
        let workstream_ids = workstreams
            .iter()
            .filter(|w| w.start_month <= end && w.end_month >= start)
            .map(|w| w.id.clone())
            .collect();
        phases.push(Phase {
            name,
            start_month: start,
            end_month: end,
            workstream_ids,
        });
        match end.checked_add(1) {
            Some(next) => start = next,
            None => break,
        }
    }
    phases
}

/// One milestone per work phase listing up to five deliverables that fall
/// due by the phase end and were not claimed by an earlier milestone.
fn milestones(phases: &[Phase], workstreams: &[Workstream]) -> Vec<Milestone> {
    let mut deliverables: Vec<(u32, &str)> = workstreams
        .iter()
        .flat_map(|w| w.deliverables.iter())
        .map(|d| (d.due_month, d.id.as_str()))
        .collect();
    deliverables.sort();

    let mut claimed: BTreeSet<&str> = BTreeSet::new();
    phases
        .iter()
        .enumerate()
        .map(|(i, phase)| {
            let mut deliverable_ids = Vec::new();
            for &(due, id) in &deliverables {
                if deliverable_ids.len() == MAX_MILESTONE_DELIVERABLES {
                    break;
                }
                if due <= phase.end_month && claimed.insert(id) {
                    deliverable_ids.push(id.to_string());
                }
            }
            Milestone {
                id: format!("ms-{}", i + 1),
                name: format!("{} Complete", phase.name),
                due_month: phase.end_month,
                deliverable_ids,
            }
        })
        .collect()
}

/// Longest dependency chain by duration, ending at the latest-ending
/// workstream. Unknown dependencies are ignored.
pub fn critical_path(workstreams: &[Workstream]) -> Vec<String> {
    let (order, _) = topological_order(workstreams);
    let index: HashMap<&str, usize> = workstreams
        .iter()
        .enumerate()
        .map(|(i, w)| (w.id.as_str(), i))
        .collect();

    // Forward pass: chain length (in months) ending at each workstream.
    let mut finish: Vec<Option<u32>> = vec![None; workstreams.len()];
    let mut predecessor: Vec<Option<usize>> = vec![None; workstreams.len()];
    for &i in &order {
        let ws = &workstreams[i];
        let mut best: Option<(u32, usize)> = None;
        for dep in &ws.dependencies {
            let Some(&d) = index.get(dep.as_str()) else {
                continue;
            };
            let Some(dep_finish) = finish[d] else {
                continue;
            };
            let better = match best {
                None => true,
                Some((f, b)) => {
                    dep_finish > f || (dep_finish == f && workstreams[d].id < workstreams[b].id)
                }
            };
            if better {
                best = Some((dep_finish, d));
            }
        }
        finish[i] = Some(best.map_or(0, |(f, _)| f).saturating_add(ws.duration()));
        predecessor[i] = best.map(|(_, d)| d);
    }

    let end = order.iter().copied().max_by(|&a, &b| {
        workstreams[a]
            .end_month
            .cmp(&workstreams[b].end_month)
            .then(finish[a].cmp(&finish[b]))
            .then(workstreams[b].id.cmp(&workstreams[a].id))
    });

    let mut path = Vec::new();
    let mut cursor = end;
    while let Some(i) = cursor {
        path.push(workstreams[i].id.clone());
        cursor = predecessor[i];
    }
    path.reverse();
    path
}

/// Shift every workstream that starts before one of its dependencies ends
/// so that it starts the month after, keeping its duration.
///
/// Returns the shifts applied, in topological order.
pub fn align_to_dependencies(workstreams: &mut [Workstream]) -> Vec<ScheduleShift> {
    let (order, _) = topological_order(workstreams);
    let index: HashMap<String, usize> = workstreams
        .iter()
        .enumerate()
        .map(|(i, w)| (w.id.clone(), i))
        .collect();

    let mut shifts = Vec::new();
    for i in order {
        let earliest = workstreams[i]
            .dependencies
            .iter()
            .filter_map(|dep| index.get(dep))
            .map(|&d| workstreams[d].end_month.saturating_add(1))
            .max();
        let Some(earliest) = earliest else {
            continue;
        };
        let ws = &mut workstreams[i];
        if ws.start_month < earliest {
            shifts.push(ScheduleShift {
                workstream_id: ws.id.clone(),
                from_start: ws.start_month,
                to_start: earliest,
            });
            ws.shift_to(earliest);
        }
    }
    shifts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Constraints, Deliverable, Scale, TimelineRange};
    use crate::synthesis::test_support::workstream;

    fn context(range: Option<(u32, u32)>) -> BusinessContext {
        BusinessContext {
            name: "Acme".into(),
            business_type: "saas".into(),
            scale: Scale::Smb,
            description: "analytics".into(),
            industry: None,
            keywords: vec![],
            constraints: range.map(|(min, max)| Constraints {
                timeline_range: Some(TimelineRange { min, max }),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn empty_workstreams_take_one_month() {
        let timeline = schedule(&UpstreamInsights::default(), &[], &context(None));
        assert_eq!(timeline.total_months, 1);
        assert!(timeline.phases.is_empty());
        assert!(timeline.critical_path.is_empty());
    }

    #[test]
    fn phases_cover_span_in_thirds() {
        let ws = vec![workstream("a", 0, 4, &[]), workstream("b", 5, 8, &["a"])];
        let timeline = schedule(&UpstreamInsights::default(), &ws, &context(None));
        let bounds: Vec<(u32, u32)> = timeline
            .phases
            .iter()
            .map(|p| (p.start_month, p.end_month))
            .collect();
        assert_eq!(bounds, [(0, 2), (3, 5), (6, 8)]);
        assert_eq!(timeline.phases[1].workstream_ids, ["a", "b"]);
        assert_eq!(timeline.phases[0].name, "Phase 1");
        assert_eq!(timeline.milestones[2].name, "Phase 3 Complete");
    }

    #[test]
    fn short_spans_use_two_month_phases() {
        let ws = vec![workstream("a", 0, 2, &[])];
        let timeline = schedule(&UpstreamInsights::default(), &ws, &context(None));
        let bounds: Vec<(u32, u32)> = timeline
            .phases
            .iter()
            .map(|p| (p.start_month, p.end_month))
            .collect();
        assert_eq!(bounds, [(0, 1), (2, 2)]);
    }

    #[test]
    fn phase_labels_come_from_insights() {
        let insights = UpstreamInsights {
            frameworks: vec![],
            phase_labels: vec!["Discover".into()],
        };
        let ws = vec![workstream("a", 0, 5, &[])];
        let timeline = schedule(&insights, &ws, &context(None));
        assert_eq!(timeline.phases[0].name, "Discover");
        assert_eq!(timeline.phases[1].name, "Phase 2");
    }

    #[test]
    fn milestones_claim_each_deliverable_once() {
        let mut a = workstream("a", 0, 5, &[]);
        a.deliverables = (0..7)
            .map(|i| Deliverable {
                id: format!("d{i}"),
                name: format!("D{i}"),
                due_month: i % 3,
                effort_estimate: 1.0,
            })
            .collect();
        let timeline = schedule(&UpstreamInsights::default(), &[a], &context(None));
        assert_eq!(timeline.milestones[0].deliverable_ids.len(), 5);
        assert_eq!(timeline.milestones[1].deliverable_ids.len(), 2);
        assert_eq!(timeline.milestones[0].due_month, 1);
    }

    #[test]
    fn critical_path_follows_longest_chain() {
        let ws = vec![
            workstream("a", 0, 1, &[]),
            workstream("b", 0, 4, &[]),
            workstream("c", 5, 8, &["a", "b"]),
            workstream("d", 2, 3, &["a"]),
        ];
        assert_eq!(critical_path(&ws), ["b", "c"]);
    }

    #[test]
    fn align_shifts_dependents_after_their_dependencies() {
        let mut ws = vec![
            workstream("a", 0, 3, &[]),
            workstream("b", 2, 4, &["a"]),
            workstream("c", 1, 1, &["b"]),
        ];
        let shifts = align_to_dependencies(&mut ws);
        assert_eq!((ws[1].start_month, ws[1].end_month), (4, 6));
        assert_eq!((ws[2].start_month, ws[2].end_month), (7, 7));
        let moved: Vec<&str> = shifts.iter().map(|s| s.workstream_id.as_str()).collect();
        assert_eq!(moved, ["b", "c"]);
        assert_eq!(shifts[0].from_start, 2);
    }

    #[test]
    fn aligned_graph_is_untouched() {
        let mut ws = vec![workstream("a", 0, 3, &[]), workstream("b", 4, 6, &["a"])];
        assert!(align_to_dependencies(&mut ws).is_empty());
    }

    #[test]
    fn month_arithmetic_saturates_at_the_end_of_range() {
        let ws = vec![workstream("a", 0, u32::MAX, &[]), workstream("b", 0, 2, &["a"])];
        assert_eq!(effective_duration(&ws), u32::MAX);

        let timeline = schedule(&UpstreamInsights::default(), &ws, &context(None));
        assert_eq!(timeline.total_months, u32::MAX);
        // The saturated span leaves a one-month phase at the very end.
        assert_eq!(timeline.phases.len(), 4);
        assert_eq!(timeline.phases[3].start_month, u32::MAX);
        assert_eq!(timeline.phases[3].end_month, u32::MAX);

        let mut ws = ws;
        let shifts = align_to_dependencies(&mut ws);
        assert_eq!(shifts[0].to_start, u32::MAX);
        assert_eq!(ws[1].end_month, u32::MAX);
    }
}
