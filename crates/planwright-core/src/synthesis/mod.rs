//! Round synthesis: merging one round's agent outputs into a delta.
//!
//! Contributions are typed per program section, so merging is an
//! exhaustive match over [`Contribution`] rather than field-name guessing.
//! The synthesizer is a pure function of the *set* of outputs: arrival
//! order never changes the delta it produces.

mod draft;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BudgetLine, Decision, ResourceRole, Risk, Workstream};

pub use draft::{ProgramDraft, Sections};

/// The program section a contribution targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Workstream,
    Resource,
    Risk,
    BudgetLine,
    Decision,
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Workstream => "workstream",
            Self::Resource => "resource",
            Self::Risk => "risk",
            Self::BudgetLine => "budget_line",
            Self::Decision => "decision",
        };
        f.write_str(s)
    }
}

impl FromStr for SectionKind {
    type Err = EntityKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workstream" => Ok(Self::Workstream),
            "resource" => Ok(Self::Resource),
            "risk" => Ok(Self::Risk),
            "budget_line" => Ok(Self::BudgetLine),
            "decision" => Ok(Self::Decision),
            other => Err(EntityKeyParseError(other.to_owned())),
        }
    }
}

/// Identity of a program entity: section plus id, role, category or topic.
///
/// Serialized as `"<section>:<id>"` so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct EntityKey {
    pub kind: SectionKind,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: SectionKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Error)]
#[error("invalid entity key: {0:?}")]
pub struct EntityKeyParseError(pub String);

impl FromStr for EntityKey {
    type Err = EntityKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| EntityKeyParseError(s.to_owned()))?;
        Ok(Self::new(kind.parse()?, id))
    }
}

impl From<EntityKey> for String {
    fn from(key: EntityKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for EntityKey {
    type Error = EntityKeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A value an agent proposes for one program entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "section", rename_all = "snake_case")]
pub enum Contribution {
    Workstream(Workstream),
    Resource(ResourceRole),
    Risk(Risk),
    BudgetLine(BudgetLine),
    Decision(Decision),
}

impl Contribution {
    pub fn kind(&self) -> SectionKind {
        match self {
            Self::Workstream(_) => SectionKind::Workstream,
            Self::Resource(_) => SectionKind::Resource,
            Self::Risk(_) => SectionKind::Risk,
            Self::BudgetLine(_) => SectionKind::BudgetLine,
            Self::Decision(_) => SectionKind::Decision,
        }
    }

    /// The entity this contribution sets.
    pub fn key(&self) -> EntityKey {
        let id = match self {
            Self::Workstream(w) => &w.id,
            Self::Resource(r) => &r.role,
            Self::Risk(r) => &r.id,
            Self::BudgetLine(b) => &b.category,
            Self::Decision(d) => &d.topic,
        };
        EntityKey::new(self.kind(), id.clone())
    }
}

/// One agent's output for one round. Entries of the session log are never
/// rewritten once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutput {
    pub agent_id: String,
    pub round: u32,
    pub contributions: Vec<Contribution>,
    pub confidence: f64,
    pub reasoning: String,
    pub recorded_at: DateTime<Utc>,
}

/// A contribution together with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub agent_id: String,
    pub round: u32,
    pub confidence: f64,
    pub contribution: Contribution,
}

impl Candidate {
    /// Order by descending confidence, then ascending agent id.
    fn synthesis_order(&self, other: &Self) -> Ordering {
        other
            .confidence
            .total_cmp(&self.confidence)
            .then_with(|| self.agent_id.cmp(&other.agent_id))
    }
}

/// The merged proposals for one entity in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaEntry {
    /// Highest-confidence proposal.
    pub base: Candidate,
    /// Every other proposal, kept as evidence for conflict resolution.
    #[serde(default)]
    pub alternatives: Vec<Candidate>,
}

impl DeltaEntry {
    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        std::iter::once(&self.base).chain(self.alternatives.iter())
    }
}

/// Everything one round proposes, keyed by entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundDelta {
    pub round: u32,
    pub entries: BTreeMap<EntityKey, DeltaEntry>,
}

impl RoundDelta {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merge the outputs of `round` into a [`RoundDelta`].
///
/// Outputs for other rounds are ignored.
pub fn synthesize(round: u32, outputs: &[AgentOutput]) -> RoundDelta {
    let mut ordered: Vec<&AgentOutput> = outputs.iter().filter(|o| o.round == round).collect();
    ordered.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

    let mut grouped: BTreeMap<EntityKey, Vec<Candidate>> = BTreeMap::new();
    for output in ordered {
        for contribution in &output.contributions {
            grouped
                .entry(contribution.key())
                .or_default()
                .push(Candidate {
                    agent_id: output.agent_id.clone(),
                    round,
                    confidence: output.confidence,
                    contribution: contribution.clone(),
                });
        }
    }

    let entries = grouped
        .into_iter()
        .filter_map(|(key, mut candidates)| {
            candidates.sort_by(Candidate::synthesis_order);
            let mut iter = candidates.into_iter();
            let base = iter.next()?;
            Some((
                key,
                DeltaEntry {
                    base,
                    alternatives: iter.collect(),
                },
            ))
        })
        .collect();

    RoundDelta { round, entries }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn entity_key_roundtrips_through_string() {
        let key = EntityKey::new(SectionKind::BudgetLine, "Technology");
        assert_eq!(key.to_string(), "budget_line:Technology");
        let parsed: EntityKey = "budget_line:Technology".parse().unwrap();
        assert_eq!(parsed, key);
        assert!("nonsense".parse::<EntityKey>().is_err());
    }

    #[test]
    fn contribution_is_tagged_by_section() {
        let json = serde_json::to_value(Contribution::Risk(risk("r1"))).unwrap();
        assert_eq!(json["section"], "risk");
        assert_eq!(json["id"], "r1");
    }

    #[test]
    fn highest_confidence_becomes_base() {
        let outputs = vec![
            output("a_agent", 2, 0.6, vec![Contribution::Workstream(workstream("ws-1", 0, 3, &[]))]),
            output("b_agent", 2, 0.9, vec![Contribution::Workstream(workstream("ws-1", 0, 5, &[]))]),
        ];
        let delta = synthesize(2, &outputs);
        let entry = &delta.entries[&EntityKey::new(SectionKind::Workstream, "ws-1")];
        assert_eq!(entry.base.agent_id, "b_agent");
        assert_eq!(entry.alternatives.len(), 1);
        assert_eq!(entry.alternatives[0].agent_id, "a_agent");
    }

    #[test]
    fn equal_confidence_prefers_lower_agent_id() {
        let outputs = vec![
            output("zeta", 1, 0.7, vec![Contribution::Risk(risk("r1"))]),
            output("alpha", 1, 0.7, vec![Contribution::Risk(risk("r1"))]),
        ];
        let delta = synthesize(1, &outputs);
        let entry = delta.entries.values().next().unwrap();
        assert_eq!(entry.base.agent_id, "alpha");
    }

    #[test]
    fn arrival_order_does_not_matter() {
        let a = output("a", 6, 0.8, vec![Contribution::BudgetLine(budget_line("Technology", 1.0))]);
        let b = output("b", 6, 0.8, vec![Contribution::BudgetLine(budget_line("Technology", 2.0))]);
        let c = output("c", 6, 0.5, vec![Contribution::Risk(risk("r1"))]);

        let forward = synthesize(6, &[a.clone(), b.clone(), c.clone()]);
        let reversed = synthesize(6, &[c, b, a]);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn ignores_other_rounds() {
        let outputs = vec![output("a", 1, 0.8, vec![Contribution::Risk(risk("r1"))])];
        assert!(synthesize(2, &outputs).is_empty());
    }
}
