//! Structural checks over the workstream dependency graph.

use std::collections::{BTreeMap, HashSet, VecDeque};

use thiserror::Error;

use crate::model::{MAX_MONTH, Workstream};

/// A conflict that cannot be reconciled by picking a winner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralConflict {
    #[error("workstream {0:?} depends on itself")]
    SelfDependency(String),

    #[error("dependency cycle detected involving workstreams: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("workstream {workstream:?} depends on unknown workstream {dependency:?}")]
    DanglingDependency {
        workstream: String,
        dependency: String,
    },

    #[error("workstream {workstream:?} ends (month {end_month}) before it starts (month {start_month})")]
    InvertedSpan {
        workstream: String,
        start_month: u32,
        end_month: u32,
    },

    #[error("workstream {workstream:?} uses month {month}, beyond the {MAX_MONTH}-month limit")]
    MonthOutOfRange { workstream: String, month: u32 },
}

/// Validate the dependency graph and each workstream's month span.
///
/// Self-dependencies and cycles are always rejected. Dependencies on
/// workstreams that do not exist are tolerated mid-generation (a later
/// round may still define them) and rejected when `finalizing`.
pub fn check_dependency_graph(
    workstreams: &[Workstream],
    finalizing: bool,
) -> Result<(), StructuralConflict> {
    let known: HashSet<&str> = workstreams.iter().map(|w| w.id.as_str()).collect();

    for ws in workstreams {
        check_months(ws)?;
        for dep in &ws.dependencies {
            if dep == &ws.id {
                return Err(StructuralConflict::SelfDependency(ws.id.clone()));
            }
            if finalizing && !known.contains(dep.as_str()) {
                return Err(StructuralConflict::DanglingDependency {
                    workstream: ws.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let (_, unsorted) = topological_order(workstreams);
    if !unsorted.is_empty() {
        return Err(StructuralConflict::Cycle(unsorted));
    }
    Ok(())
}

fn check_months(ws: &Workstream) -> Result<(), StructuralConflict> {
    if ws.start_month > ws.end_month {
        return Err(StructuralConflict::InvertedSpan {
            workstream: ws.id.clone(),
            start_month: ws.start_month,
            end_month: ws.end_month,
        });
    }
    let latest = ws
        .deliverables
        .iter()
        .map(|d| d.due_month)
        .fold(ws.end_month, u32::max);
    if latest > MAX_MONTH {
        return Err(StructuralConflict::MonthOutOfRange {
            workstream: ws.id.clone(),
            month: latest,
        });
    }
    Ok(())
}

/// Kahn's algorithm over the workstreams, ignoring unknown dependencies.
///
/// Returns the indices in topological order (ties broken by id) and the
/// ids of workstreams left on a cycle.
pub(crate) fn topological_order(workstreams: &[Workstream]) -> (Vec<usize>, Vec<String>) {
    let index: BTreeMap<&str, usize> = workstreams
        .iter()
        .enumerate()
        .map(|(i, w)| (w.id.as_str(), i))
        .collect();

    let n = workstreams.len();
    let mut in_degree = vec![0usize; n];
    let mut adj: Vec<Vec<usize>> = vec![vec![]; n];

    for (i, ws) in workstreams.iter().enumerate() {
        let deps: HashSet<&str> = ws.dependencies.iter().map(String::as_str).collect();
        for dep in deps {
            if let Some(&d) = index.get(dep) {
                // Edge: dep -> ws.
                adj[d].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    ready.sort_by(|&a, &b| workstreams[a].id.cmp(&workstreams[b].id));
    let mut queue: VecDeque<usize> = ready.into();

    let mut order = Vec::with_capacity(n);
    while let Some(node) = queue.pop_front() {
        order.push(node);
        let mut released = Vec::new();
        for &next in &adj[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                released.push(next);
            }
        }
        released.sort_by(|&a, &b| workstreams[a].id.cmp(&workstreams[b].id));
        queue.extend(released);
    }

    let mut unsorted: Vec<String> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, deg)| **deg > 0)
        .map(|(i, _)| workstreams[i].id.clone())
        .collect();
    unsorted.sort();
    (order, unsorted)
}
