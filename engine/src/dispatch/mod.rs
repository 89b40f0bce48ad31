//! Budget-guarded specialist dispatch.
//!
//! ```text
//! RoutingDecision ──► selected(top_k) ──► BudgetGuard::admit
//!                                            │
//!        Admit ──► JoinSet fan-out (Semaphore = max_concurrency)
//!                  each call: timeout(call_timeout)
//!                  whole set: timeout_at(request deadline) ──► abort stragglers
//!    Downgrade ──► one call at a time, headroom checked before each
//!         Deny ──► DispatchError::BudgetDenied
//! ```
//!
//! ## Partial failure policy
//!
//! Any successful call yields a ballot and the request proceeds with the
//! ballots it has. Only when no ballot at all survives does dispatch
//! return `DispatchError::Exhausted`. Ballots are always reported in
//! routing order, regardless of completion order.

mod call;

pub(crate) use call::{run_call, settle};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::budget::{Admission, BudgetGuard, Cost, RequestBudget};
use crate::config::DispatchConfig;
use crate::ensemble::{BallotBox, SpecialistResult, VotingEngine};
use crate::error::{CallFailure, FailureKind};
use crate::events::{RoutingEvent, SharedEventBus};
use crate::registry::{SpecialistError, SpecialistRegistry};
use crate::router::{RoutedSpecialist, RoutingDecision};
use call::CallOutcome;

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("budget denied: {remaining_today} left today, {remaining_request} left for this request")]
    BudgetDenied {
        remaining_today: Cost,
        remaining_request: Cost,
    },

    #[error("all {} dispatched specialists failed", failures.len())]
    Exhausted { failures: Vec<CallFailure> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Concurrent,
    Sequential,
}

#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub ballots: BallotBox,
    pub failures: Vec<CallFailure>,
    pub admission: Admission,
    pub mode: ExecutionMode,
    /// Specialists selected for this dispatch, in routing order
    pub selected: Vec<String>,
}

type SlotOutcome = Option<Result<SpecialistResult, CallFailure>>;

pub struct Dispatcher {
    registry: Arc<SpecialistRegistry>,
    voting: Arc<VotingEngine>,
    config: DispatchConfig,
    events: SharedEventBus,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SpecialistRegistry>,
        voting: Arc<VotingEngine>,
        config: DispatchConfig,
        events: SharedEventBus,
    ) -> Self {
        Self {
            registry,
            voting,
            config,
            events,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Estimated cost and latency of calling `selected` concurrently.
    fn estimate(&self, selected: &[RoutedSpecialist]) -> (Cost, Duration) {
        selected
            .iter()
            .filter_map(|entry| self.registry.by_index(entry.index))
            .map(|s| (s.profile().cost_per_call, s.profile().expected_latency()))
            .fold((Cost::ZERO, Duration::ZERO), |(cost, latency), (c, l)| {
                (cost + c, latency.max(l))
            })
    }

    pub async fn dispatch(
        &self,
        prompt: &str,
        decision: &RoutingDecision,
        top_k: usize,
        guard: &BudgetGuard,
        budget: &RequestBudget,
    ) -> Result<DispatchReport, DispatchError> {
        let selected = decision.selected(top_k);
        let (estimated_cost, estimated_latency) = self.estimate(selected);
        let admission = guard.admit(budget, estimated_cost, estimated_latency);

        self.events.publish(RoutingEvent::BudgetDecision {
            request_id: budget.request_id().to_string(),
            admission,
            estimated_cost,
            timestamp: Utc::now(),
        });

        let prompt: Arc<str> = Arc::from(prompt);
        let deadline = Instant::now() + self.config.request_timeout();
        let (outcomes, mode) = match admission {
            Admission::Deny => {
                warn!(
                    request_id = budget.request_id(),
                    estimated_cost = %estimated_cost,
                    "Dispatch denied by budget"
                );
                return Err(DispatchError::BudgetDenied {
                    remaining_today: guard.state().remaining_today(),
                    remaining_request: budget.remaining(),
                });
            }
            Admission::Admit => (
                self.fan_out(selected, prompt, deadline, guard, budget).await,
                ExecutionMode::Concurrent,
            ),
            Admission::Downgrade => {
                info!(
                    request_id = budget.request_id(),
                    estimated_cost = %estimated_cost,
                    "Budget tight, dispatching sequentially"
                );
                (
                    self.sequential(selected, prompt, deadline, guard, budget).await,
                    ExecutionMode::Sequential,
                )
            }
        };

        let report = self.collect(selected, outcomes, admission, mode, budget.request_id());
        info!(
            request_id = budget.request_id(),
            %admission,
            selected = report.selected.len(),
            ballots = report.ballots.len(),
            failures = report.failures.len(),
            "Dispatch finished"
        );

        if report.ballots.is_empty() {
            return Err(DispatchError::Exhausted {
                failures: report.failures,
            });
        }
        Ok(report)
    }

    async fn fan_out(
        &self,
        selected: &[RoutedSpecialist],
        prompt: Arc<str>,
        deadline: Instant,
        guard: &BudgetGuard,
        budget: &RequestBudget,
    ) -> Vec<SlotOutcome> {
        let sem = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let call_timeout = self.config.call_timeout();
        let mut join_set: JoinSet<CallOutcome> = JoinSet::new();

        for (slot, entry) in selected.iter().enumerate() {
            let Some(specialist) = self.registry.by_index(entry.index).cloned() else {
                continue;
            };
            let sem = sem.clone();
            let prompt = prompt.clone();

            join_set.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return CallOutcome {
                        slot,
                        specialist,
                        latency: Duration::ZERO,
                        result: Err(SpecialistError::Cancelled),
                    };
                };
                run_call(slot, specialist, prompt, call_timeout).await
            });
        }

        let mut outcomes: Vec<SlotOutcome> = (0..selected.len()).map(|_| None).collect();
        loop {
            match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok(outcome))) => {
                    let slot = outcome.slot;
                    let settled = settle(outcome, guard, budget, &self.events);
                    if let Some(entry) = outcomes.get_mut(slot) {
                        *entry = Some(settled);
                    }
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Specialist task panicked");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        request_id = budget.request_id(),
                        pending = join_set.len(),
                        "Request deadline reached, cancelling outstanding calls"
                    );
                    join_set.abort_all();
                    for (slot, entry) in selected.iter().enumerate() {
                        if outcomes[slot].is_none() {
                            outcomes[slot] = Some(Err(self.cancelled(entry, budget)));
                        }
                    }
                    break;
                }
            }
        }
        outcomes
    }

    async fn sequential(
        &self,
        selected: &[RoutedSpecialist],
        prompt: Arc<str>,
        deadline: Instant,
        guard: &BudgetGuard,
        budget: &RequestBudget,
    ) -> Vec<SlotOutcome> {
        let mut outcomes: Vec<SlotOutcome> = (0..selected.len()).map(|_| None).collect();

        for (slot, entry) in selected.iter().enumerate() {
            let Some(specialist) = self.registry.by_index(entry.index).cloned() else {
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                outcomes[slot] = Some(Err(CallFailure::new(
                    &entry.name,
                    FailureKind::SkippedDeadline,
                    "request deadline passed",
                )));
                continue;
            }
            let cost = specialist.profile().cost_per_call;
            if !guard.has_headroom(budget, cost) {
                info!(
                    request_id = budget.request_id(),
                    specialist = %entry.name,
                    cost = %cost,
                    "Skipping specialist, no budget headroom"
                );
                outcomes[slot] = Some(Err(CallFailure::new(
                    &entry.name,
                    FailureKind::SkippedBudget,
                    format!("needs {cost}, request has {}", budget.remaining()),
                )));
                continue;
            }

            let call_timeout = self.config.call_timeout().min(deadline - now);
            let outcome = run_call(slot, specialist, prompt.clone(), call_timeout).await;
            outcomes[slot] = Some(settle(outcome, guard, budget, &self.events));
        }
        outcomes
    }

    fn cancelled(&self, entry: &RoutedSpecialist, budget: &RequestBudget) -> CallFailure {
        let error = SpecialistError::Cancelled;
        self.events.publish(RoutingEvent::SpecialistFailed {
            request_id: budget.request_id().to_string(),
            specialist: entry.name.clone(),
            kind: error.kind(),
            detail: error.to_string(),
            timestamp: Utc::now(),
        });
        CallFailure::new(&entry.name, error.kind(), error.to_string())
    }

    /// Weight results into ballots in routing order.
    fn collect(
        &self,
        selected: &[RoutedSpecialist],
        outcomes: Vec<SlotOutcome>,
        admission: Admission,
        mode: ExecutionMode,
        request_id: &str,
    ) -> DispatchReport {
        let mut ballots = BallotBox::new();
        let mut failures = Vec::new();

        for (entry, outcome) in selected.iter().zip(outcomes) {
            match outcome {
                Some(Ok(result)) => match self.voting.ballot(result, entry.index) {
                    Ok(ballot) => ballots.push(ballot),
                    Err(e) => {
                        warn!(request_id, specialist = %entry.name, error = %e, "Dropping ballot");
                        self.events.publish(RoutingEvent::BallotDropped {
                            request_id: request_id.to_string(),
                            specialist: entry.name.clone(),
                            reason: e.to_string(),
                            timestamp: Utc::now(),
                        });
                        failures.push(CallFailure::new(
                            &entry.name,
                            FailureKind::InvalidConfidence,
                            e.to_string(),
                        ));
                    }
                },
                Some(Err(failure)) => failures.push(failure),
                None => failures.push(CallFailure::new(
                    &entry.name,
                    FailureKind::Error,
                    "specialist task ended without a result",
                )),
            }
        }

        DispatchReport {
            ballots,
            failures,
            admission,
            mode,
            selected: selected.iter().map(|e| e.name.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetState;
    use crate::events::EventBus;
    use crate::registry::{Domain, Specialist, SpecialistProfile, SpecialistReply};
    use crate::router::Classifier;
    use async_trait::async_trait;

    struct Delayed {
        profile: SpecialistProfile,
        delay_ms: u64,
    }

    #[async_trait]
    impl Specialist for Delayed {
        fn profile(&self) -> &SpecialistProfile {
            &self.profile
        }

        async fn call(&self, _prompt: &str) -> Result<SpecialistReply, SpecialistError> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(SpecialistReply::text(format!("{} answered after a while", self.profile.name)))
        }
    }

    fn delayed(name: &str, domain: Domain, delay_ms: u64) -> Arc<Delayed> {
        Arc::new(Delayed {
            profile: SpecialistProfile::new(name, domain, 0.8)
                .with_cost(Cost::from_cents(1.0))
                .with_expected_latency_ms(100),
            delay_ms,
        })
    }

    fn setup(daily_cents: f64, request_cents: f64) -> (Dispatcher, RoutingDecision, BudgetGuard) {
        let registry = SpecialistRegistry::builder()
            .register(delayed("math", Domain::Math, 300))
            .register(delayed("code", Domain::Code, 200))
            .register(delayed("general", Domain::General, 100))
            .build()
            .unwrap();
        let decision = Classifier::builtin(3)
            .unwrap()
            .classify("What is 15 * 23?", &registry, None);
        let registry = Arc::new(registry);
        let guard = BudgetGuard::new(
            BudgetState::new(Cost::from_cents(daily_cents), Cost::from_cents(request_cents)).shared(),
            registry.cheapest_cost(),
            Duration::from_secs(10),
        );
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(VotingEngine::default()),
            DispatchConfig::default(),
            EventBus::new().shared(),
        );
        (dispatcher, decision, guard)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ballots_keep_routing_order() {
        let (dispatcher, decision, guard) = setup(100.0, 10.0);
        let budget = guard.begin_request("r1");

        let report = dispatcher
            .dispatch("What is 15 * 23?", &decision, 4, &guard, &budget)
            .await
            .unwrap();

        assert_eq!(report.mode, ExecutionMode::Concurrent);
        let order: Vec<&str> = report.ballots.iter().map(|b| b.result.specialist.as_str()).collect();
        assert_eq!(order, vec!["math", "general", "code"]);
        assert_eq!(budget.spent(), Cost::from_cents(3.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_top_k_limits_dispatch() {
        let (dispatcher, decision, guard) = setup(100.0, 10.0);
        let budget = guard.begin_request("r1");

        let report = dispatcher
            .dispatch("What is 15 * 23?", &decision, 2, &guard, &budget)
            .await
            .unwrap();
        assert_eq!(report.selected, vec!["math", "general"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_downgrade_runs_sequentially() {
        let (dispatcher, decision, guard) = setup(100.0, 2.0);
        let budget = guard.begin_request("r1");

        let report = dispatcher
            .dispatch("What is 15 * 23?", &decision, 4, &guard, &budget)
            .await
            .unwrap();

        assert_eq!(report.admission, Admission::Downgrade);
        assert_eq!(report.mode, ExecutionMode::Sequential);
        let answered: Vec<&str> = report.ballots.iter().map(|b| b.result.specialist.as_str()).collect();
        assert_eq!(answered, vec!["math", "general"]);
        assert_eq!(report.failures[0].kind, FailureKind::SkippedBudget);
        assert_eq!(report.failures[0].specialist, "code");
    }

    #[tokio::test]
    async fn test_deny_calls_nothing() {
        let (dispatcher, decision, guard) = setup(0.5, 10.0);
        let budget = guard.begin_request("r1");

        let err = dispatcher
            .dispatch("What is 15 * 23?", &decision, 4, &guard, &budget)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::BudgetDenied { .. }));
        assert_eq!(budget.spent(), Cost::ZERO);
    }
}
