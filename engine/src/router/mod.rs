//! Routing: which specialists see a prompt, and in what order.
//!
//! The [`Classifier`] picks a primary specialist from lexical intent
//! signals, then always appends comparison specialists so a single
//! confident match can never lock the council out. Callers may bypass
//! classification by naming candidates explicitly.

pub mod classifier;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::registry::{Domain, SpecialistRegistry};

pub use classifier::{Classifier, IntentRule};

/// Why a specialist is in a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RouteReason {
    /// Highest intent score for this prompt.
    Primary { score: f64 },
    /// No intent signal matched; the general specialist leads.
    Fallback,
    /// Appended so the vote always has alternatives.
    ComparisonFill,
    /// Named by the caller.
    Requested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    /// Dispatch several specialists and vote.
    Compare,
    /// Dispatch only the first entry.
    Single,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedSpecialist {
    pub name: String,
    /// Position in the registry's declaration order.
    pub index: usize,
    pub domain: Domain,
    #[serde(flatten)]
    pub reason: RouteReason,
}

/// Ordered specialists for one request. Never empty; the first entry is
/// the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub entries: Vec<RoutedSpecialist>,
    pub mode: DecisionMode,
    /// Intent score per domain that drove the primary pick.
    pub domain_scores: BTreeMap<Domain, f64>,
}

impl RoutingDecision {
    pub fn primary(&self) -> &RoutedSpecialist {
        &self.entries[0]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Specialists to actually call given a caller's top_k.
    pub fn selected(&self, top_k: usize) -> &[RoutedSpecialist] {
        let limit = match self.mode {
            DecisionMode::Single => 1,
            DecisionMode::Compare => top_k.max(1),
        };
        &self.entries[..limit.min(self.entries.len())]
    }

    /// Build a decision from caller-named specialists. Unknown and repeated
    /// names are skipped; `None` if nothing valid remains.
    pub fn from_candidates(names: &[String], registry: &SpecialistRegistry) -> Option<Self> {
        let mut entries: Vec<RoutedSpecialist> = Vec::new();
        for name in names {
            let Some(index) = registry.index_of(name) else {
                warn!(specialist = %name, "Ignoring unknown candidate specialist");
                continue;
            };
            if entries.iter().any(|e| e.index == index) {
                continue;
            }
            let Some(specialist) = registry.by_index(index) else {
                continue;
            };
            entries.push(RoutedSpecialist {
                name: name.clone(),
                index,
                domain: specialist.profile().domain,
                reason: RouteReason::Requested,
            });
        }

        if entries.is_empty() {
            return None;
        }
        let mode = if entries.len() == 1 {
            DecisionMode::Single
        } else {
            DecisionMode::Compare
        };
        Some(Self {
            entries,
            mode,
            domain_scores: BTreeMap::new(),
        })
    }
}

/// Prior turns of a conversation, most recent last.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    pub recent_prompts: Vec<String>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, prompt: impl Into<String>) {
        self.recent_prompts.push(prompt.into());
    }

    pub fn last_prompt(&self) -> Option<&str> {
        self.recent_prompts.last().map(String::as_str)
    }
}
