use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{AgentOutput, Candidate, Contribution, EntityKey};
use crate::model::{
    BudgetLine, ConflictAnnotation, ConversationEntry, Decision, ResourceRole, Risk, Workstream,
};

/// The accepted program state between rounds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramDraft {
    accepted: BTreeMap<EntityKey, Candidate>,
    #[serde(default)]
    annotations: Vec<ConflictAnnotation>,
    #[serde(default)]
    conversation_log: Vec<ConversationEntry>,
}

/// Accepted values grouped by section, in entity-key order.
#[derive(Debug, Clone, Default)]
pub struct Sections {
    pub workstreams: Vec<Workstream>,
    pub resources: Vec<ResourceRole>,
    pub risks: Vec<Risk>,
    pub budget_lines: Vec<BudgetLine>,
    pub decisions: Vec<Decision>,
}

impl ProgramDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepted(&self, key: &EntityKey) -> Option<&Candidate> {
        self.accepted.get(key)
    }

    pub fn accepted_entries(&self) -> impl Iterator<Item = (&EntityKey, &Candidate)> {
        self.accepted.iter()
    }

    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    pub fn annotations(&self) -> &[ConflictAnnotation] {
        &self.annotations
    }

    pub fn conversation_log(&self) -> &[ConversationEntry] {
        &self.conversation_log
    }

    pub(crate) fn accept(&mut self, key: EntityKey, candidate: Candidate) {
        self.accepted.insert(key, candidate);
    }

    pub(crate) fn annotate(&mut self, annotation: ConflictAnnotation) {
        self.annotations.push(annotation);
    }

    /// Record each output's reasoning, in agent id order.
    pub(crate) fn log_round(&mut self, round: u32, outputs: &[AgentOutput]) {
        let mut entries: Vec<ConversationEntry> = outputs
            .iter()
            .filter(|o| o.round == round)
            .map(|o| ConversationEntry {
                round,
                agent_id: o.agent_id.clone(),
                reasoning: o.reasoning.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        self.conversation_log.extend(entries);
    }

    pub fn workstreams(&self) -> Vec<Workstream> {
        self.sections().workstreams
    }

    pub fn sections(&self) -> Sections {
        let mut sections = Sections::default();
        for candidate in self.accepted.values() {
            match &candidate.contribution {
                Contribution::Workstream(w) => sections.workstreams.push(w.clone()),
                Contribution::Resource(r) => sections.resources.push(r.clone()),
                Contribution::Risk(r) => sections.risks.push(r.clone()),
                Contribution::BudgetLine(b) => sections.budget_lines.push(b.clone()),
                Contribution::Decision(d) => sections.decisions.push(d.clone()),
            }
        }
        sections
    }
}
