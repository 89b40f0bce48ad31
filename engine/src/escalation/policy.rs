//! When to consult a cloud tier.
//!
//! Escalation is a last resort. It fires only when
//!
//! 1. every local specialist failed and the budget does not deny more
//!    spend, or
//! 2. the best local ballot weighs less than `confidence_floor` and the
//!    budget admits the first cloud tier outright.
//!
//! Available budget alone never triggers escalation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::chain::{ChainOutcome, FallbackChain};
use crate::budget::{Admission, BudgetGuard, RequestBudget};
use crate::config::EscalationConfig;
use crate::ensemble::BallotBox;
use crate::error::CallFailure;
use crate::events::SharedEventBus;

/// What local dispatch produced.
#[derive(Debug, Clone, Copy)]
pub enum LocalOutcome<'a> {
    Ballots(&'a BallotBox),
    DispatchFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum EscalationTrigger {
    DispatchFailure,
    LowConfidence { best_weight: f64, floor: f64 },
}

impl std::fmt::Display for EscalationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DispatchFailure => write!(f, "dispatch_failure"),
            Self::LowConfidence { best_weight, floor } => {
                write!(f, "low_confidence ({best_weight:.3} < {floor:.3})")
            }
        }
    }
}

pub struct EscalationPolicy {
    config: EscalationConfig,
    chain: FallbackChain,
}

impl EscalationPolicy {
    pub fn new(config: EscalationConfig, chain: FallbackChain) -> Self {
        Self { config, chain }
    }

    /// Policy that never escalates.
    pub fn disabled() -> Self {
        Self::new(
            EscalationConfig {
                enabled: false,
                ..EscalationConfig::default()
            },
            FallbackChain::new(),
        )
    }

    pub fn chain(&self) -> &FallbackChain {
        &self.chain
    }

    pub fn confidence_floor(&self) -> f64 {
        self.config.confidence_floor
    }

    pub fn trigger(
        &self,
        local: LocalOutcome<'_>,
        guard: &BudgetGuard,
        budget: &RequestBudget,
    ) -> Option<EscalationTrigger> {
        if !self.config.enabled {
            return None;
        }
        let tier = self.chain.first()?;
        let profile = tier.profile();

        let trigger = match local {
            LocalOutcome::DispatchFailure => {
                let admission = guard.admit(budget, profile.cost_per_call, profile.expected_latency());
                (admission != Admission::Deny).then_some(EscalationTrigger::DispatchFailure)
            }
            LocalOutcome::Ballots(ballots) => {
                let best_weight = ballots.best_weight().unwrap_or(0.0);
                let floor = self.config.confidence_floor;
                if best_weight >= floor {
                    return None;
                }
                let admission = guard.admit(budget, profile.cost_per_call, profile.expected_latency());
                (admission == Admission::Admit)
                    .then_some(EscalationTrigger::LowConfidence { best_weight, floor })
            }
        };
        debug!(request_id = budget.request_id(), ?trigger, "Escalation check");
        trigger
    }

    pub fn should_escalate(
        &self,
        local: LocalOutcome<'_>,
        guard: &BudgetGuard,
        budget: &RequestBudget,
    ) -> bool {
        self.trigger(local, guard, budget).is_some()
    }

    pub async fn escalate(
        &self,
        prompt: &str,
        call_timeout: Duration,
        guard: &BudgetGuard,
        budget: &RequestBudget,
        events: &SharedEventBus,
    ) -> Result<ChainOutcome, Vec<CallFailure>> {
        self.chain
            .execute(prompt, call_timeout, guard, budget, events)
            .await
    }
}
