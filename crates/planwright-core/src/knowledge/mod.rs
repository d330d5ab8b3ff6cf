//! Post-generation knowledge curation.
//!
//! Derives reusable knowledge candidates from a finished [`Program`],
//! removes near-duplicates, and sorts what is left into verified,
//! contested and rejected buckets. Only verified candidates are emitted.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::{Annotation, Program};

/// Jaccard similarity above which two candidates are duplicates.
const DUPLICATE_SIMILARITY: f64 = 0.8;
/// Characters of content compared for near-duplicate detection.
const SIMILARITY_PREFIX: usize = 100;

const VERIFIED_THRESHOLD: f64 = 0.7;
const CONTESTED_THRESHOLD: f64 = 0.4;
const CONTRADICTED_CONTESTED_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeKind {
    Fact,
    LessonLearned,
    DecisionRationale,
    Pattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayer {
    Semantic,
    Episodic,
    Symbolic,
}

impl KnowledgeKind {
    pub fn memory_layer(self) -> MemoryLayer {
        match self {
            Self::Fact => MemoryLayer::Semantic,
            Self::LessonLearned | Self::DecisionRationale => MemoryLayer::Episodic,
            Self::Pattern => MemoryLayer::Symbolic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeCandidate {
    pub kind: KnowledgeKind,
    pub summary: String,
    pub content: String,
    pub confidence: f64,
    /// Where in the program the candidate came from.
    pub source: String,
    /// Set when another contribution disagreed with this one.
    #[serde(default)]
    pub contradicted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Verified,
    Contested,
    Rejected,
}

/// Classify a candidate that passed field validation.
pub fn categorize(candidate: &KnowledgeCandidate) -> Verdict {
    let c = candidate.confidence;
    if candidate.contradicted {
        if c >= CONTRADICTED_CONTESTED_THRESHOLD {
            Verdict::Contested
        } else {
            Verdict::Rejected
        }
    } else if c >= VERIFIED_THRESHOLD {
        Verdict::Verified
    } else if c >= CONTESTED_THRESHOLD {
        Verdict::Contested
    } else {
        Verdict::Rejected
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEmission {
    pub layer: MemoryLayer,
    pub candidate: KnowledgeCandidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurationStats {
    pub total_candidates: usize,
    pub verified: usize,
    pub deduplicated: usize,
    pub emitted: usize,
    pub contested: usize,
    pub rejected: usize,
    pub flagged_for_review: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeLedger {
    pub emissions: Vec<KnowledgeEmission>,
    /// Contested candidates awaiting human review.
    pub review_queue: Vec<KnowledgeCandidate>,
    pub stats: CurationStats,
}

fn has_required_fields(candidate: &KnowledgeCandidate) -> bool {
    !candidate.summary.trim().is_empty()
        && !candidate.content.trim().is_empty()
        && (0.0..=1.0).contains(&candidate.confidence)
}

fn word_set(content: &str) -> HashSet<String> {
    content
        .to_lowercase()
        .chars()
        .take(SIMILARITY_PREFIX)
        .collect::<String>()
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Validate, de-duplicate and categorize `candidates`.
pub fn curate(candidates: Vec<KnowledgeCandidate>) -> KnowledgeLedger {
    let mut ledger = KnowledgeLedger {
        stats: CurationStats {
            total_candidates: candidates.len(),
            ..Default::default()
        },
        ..Default::default()
    };

    let mut seen_summaries: HashSet<String> = HashSet::new();
    let mut seen_words: Vec<HashSet<String>> = Vec::new();

    for candidate in candidates {
        if !has_required_fields(&candidate) {
            ledger.stats.rejected += 1;
            continue;
        }

        let summary = candidate.summary.trim().to_lowercase();
        let words = word_set(&candidate.content);
        let duplicate = seen_summaries.contains(&summary)
            || seen_words
                .iter()
                .any(|seen| jaccard(seen, &words) > DUPLICATE_SIMILARITY);
        if duplicate {
            ledger.stats.deduplicated += 1;
            continue;
        }
        seen_summaries.insert(summary);
        seen_words.push(words);

        match categorize(&candidate) {
            Verdict::Verified => {
                ledger.stats.verified += 1;
                ledger.stats.emitted += 1;
                ledger.emissions.push(KnowledgeEmission {
                    layer: candidate.kind.memory_layer(),
                    candidate,
                });
            }
            Verdict::Contested => {
                ledger.stats.contested += 1;
                ledger.stats.flagged_for_review += 1;
                ledger.review_queue.push(candidate);
            }
            Verdict::Rejected => ledger.stats.rejected += 1,
        }
    }

    ledger
}

/// Knowledge candidates implied by a finished program: decisions,
/// accepted workstreams and risks, and overruled contributions.
pub fn candidates_from_program(program: &Program) -> Vec<KnowledgeCandidate> {
    let mut candidates = Vec::new();

    for decision in &program.governance.decisions {
        candidates.push(KnowledgeCandidate {
            kind: KnowledgeKind::DecisionRationale,
            summary: format!("Decision on {}", decision.topic),
            content: format!("{} Rationale: {}", decision.decision, decision.rationale),
            confidence: decision.confidence,
            source: format!("decision:{}", decision.topic),
            contradicted: false,
        });
    }

    for ws in &program.workstreams {
        candidates.push(KnowledgeCandidate {
            kind: KnowledgeKind::Fact,
            summary: format!("{} spans {} months", ws.name, ws.duration()),
            content: format!(
                "{} ({}) runs from month {} to month {} owned by {}. {}",
                ws.name, ws.id, ws.start_month, ws.end_month, ws.owner, ws.description
            ),
            confidence: ws.confidence,
            source: format!("workstream:{}", ws.id),
            contradicted: false,
        });
    }

    for risk in &program.risk_register.risks {
        candidates.push(KnowledgeCandidate {
            kind: KnowledgeKind::Pattern,
            summary: format!("Mitigation for {}", risk.id),
            content: format!("{} Mitigation: {}", risk.description, risk.mitigation),
            confidence: program.overall_confidence,
            source: format!("risk:{}", risk.id),
            contradicted: false,
        });
    }

    for annotation in &program.annotations {
        let Annotation::Conflict(conflict) = annotation else {
            continue;
        };
        for overruled in &conflict.overruled {
            candidates.push(KnowledgeCandidate {
                kind: KnowledgeKind::LessonLearned,
                summary: format!(
                    "{} proposal for {} overruled in round {}",
                    overruled.agent_id, conflict.entity_key, conflict.round
                ),
                content: format!(
                    "{} proposed {} for {} at confidence {:.2}; {} prevailed by {:?}.",
                    overruled.agent_id,
                    overruled.value,
                    conflict.entity_key,
                    overruled.confidence,
                    conflict.winner_agent_id,
                    conflict.rule
                ),
                confidence: overruled.confidence,
                source: conflict.entity_key.clone(),
                contradicted: true,
            });
        }
    }

    candidates
}
