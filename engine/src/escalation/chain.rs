//! Ordered cloud tiers, tried until one answers.
//!
//! ```text
//! tier 0 succeeds                  → ChainOutcome { level: Full }
//! tier 0 fails, tier 1 succeeds    → ChainOutcome { level: Partial, warnings }
//! every tier fails or is skipped   → Err(failures)
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::budget::{BudgetGuard, RequestBudget};
use crate::dispatch::{run_call, settle};
use crate::ensemble::SpecialistResult;
use crate::error::{CallFailure, FailureKind};
use crate::events::SharedEventBus;
use crate::registry::SharedSpecialist;

/// How far down the chain the answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// First tier answered.
    Full,
    /// A later tier answered after earlier ones failed.
    Partial,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub result: SpecialistResult,
    pub served_by: String,
    pub tier_index: usize,
    pub level: DegradationLevel,
    /// Failures of earlier tiers
    pub failures: Vec<CallFailure>,
}

#[derive(Default)]
pub struct FallbackChain {
    tiers: Vec<SharedSpecialist>,
}

impl FallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tier(mut self, tier: SharedSpecialist) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn first(&self) -> Option<&SharedSpecialist> {
        self.tiers.first()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    /// Try each tier in order. Tiers the request can no longer afford are
    /// skipped, not called.
    pub async fn execute(
        &self,
        prompt: &str,
        call_timeout: Duration,
        guard: &BudgetGuard,
        budget: &RequestBudget,
        events: &SharedEventBus,
    ) -> Result<ChainOutcome, Vec<CallFailure>> {
        let prompt: Arc<str> = Arc::from(prompt);
        let mut failures = Vec::new();

        for (index, tier) in self.tiers.iter().enumerate() {
            let cost = tier.profile().cost_per_call;
            if !guard.has_headroom(budget, cost) {
                warn!(
                    request_id = budget.request_id(),
                    tier = tier.name(),
                    cost = %cost,
                    "Skipping cloud tier, no budget headroom"
                );
                failures.push(CallFailure::new(
                    tier.name(),
                    FailureKind::SkippedBudget,
                    format!("needs {cost}, request has {}", budget.remaining()),
                ));
                continue;
            }

            let outcome = run_call(index, tier.clone(), prompt.clone(), call_timeout).await;
            match settle(outcome, guard, budget, events) {
                Ok(result) => {
                    let level = if index == 0 {
                        DegradationLevel::Full
                    } else {
                        DegradationLevel::Partial
                    };
                    info!(
                        request_id = budget.request_id(),
                        tier = tier.name(),
                        %level,
                        "Cloud tier answered"
                    );
                    return Ok(ChainOutcome {
                        result,
                        served_by: tier.name().to_string(),
                        tier_index: index,
                        level,
                        failures,
                    });
                }
                Err(failure) => failures.push(failure),
            }
        }
        Err(failures)
    }
}
