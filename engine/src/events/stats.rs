//! Running counters fed from the event bus.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::bus::EventBus;
use super::types::RoutingEvent;
use crate::error::FailureKind;

#[derive(Debug, Default)]
pub struct RoutingStats {
    requests_started: AtomicU64,
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
    budget_denials: AtomicU64,
    escalations: AtomicU64,
    consensus_fusions: AtomicU64,
    specialist_calls: AtomicU64,
    specialist_failures: AtomicU64,
    specialist_timeouts: AtomicU64,
    ballots_dropped: AtomicU64,
    cost_millicents: AtomicU64,
    lagged_events: AtomicU64,
    wins: Mutex<BTreeMap<String, u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub requests_started: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub budget_denials: u64,
    pub escalations: u64,
    pub consensus_fusions: u64,
    pub specialist_calls: u64,
    pub specialist_failures: u64,
    pub specialist_timeouts: u64,
    pub ballots_dropped: u64,
    pub total_cost_cents: f64,
    pub lagged_events: u64,
    /// Requests whose fused answer each specialist led
    pub wins: BTreeMap<String, u64>,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl RoutingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &RoutingEvent) {
        match event {
            RoutingEvent::RequestStarted { .. } => bump(&self.requests_started),
            RoutingEvent::SpecialistCompleted { cost, .. } => {
                bump(&self.specialist_calls);
                self.cost_millicents
                    .fetch_add(cost.millicents(), Ordering::Relaxed);
            }
            RoutingEvent::SpecialistFailed { kind, .. } => {
                bump(&self.specialist_failures);
                if *kind == FailureKind::Timeout {
                    bump(&self.specialist_timeouts);
                }
            }
            RoutingEvent::BallotDropped { .. } => bump(&self.ballots_dropped),
            RoutingEvent::EscalationTriggered { .. } => bump(&self.escalations),
            RoutingEvent::FusionCompleted { consensus_fusion, .. } => {
                if *consensus_fusion {
                    bump(&self.consensus_fusions);
                }
            }
            RoutingEvent::RequestCompleted { model_used, .. } => {
                bump(&self.requests_completed);
                let mut wins = self.wins.lock().unwrap_or_else(|p| p.into_inner());
                *wins.entry(model_used.clone()).or_insert(0) += 1;
            }
            RoutingEvent::RequestFailed { status, .. } => {
                bump(&self.requests_failed);
                if status == "budget_denied" {
                    bump(&self.budget_denials);
                }
            }
            RoutingEvent::RouteSelected { .. } | RoutingEvent::BudgetDecision { .. } => {}
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            requests_started: load(&self.requests_started),
            requests_completed: load(&self.requests_completed),
            requests_failed: load(&self.requests_failed),
            budget_denials: load(&self.budget_denials),
            escalations: load(&self.escalations),
            consensus_fusions: load(&self.consensus_fusions),
            specialist_calls: load(&self.specialist_calls),
            specialist_failures: load(&self.specialist_failures),
            specialist_timeouts: load(&self.specialist_timeouts),
            ballots_dropped: load(&self.ballots_dropped),
            total_cost_cents: load(&self.cost_millicents) as f64 / 1000.0,
            lagged_events: load(&self.lagged_events),
            wins: self.wins.lock().unwrap_or_else(|p| p.into_inner()).clone(),
        }
    }

    /// Subscribe to `bus` and fold every event into these counters until
    /// the bus is dropped.
    pub fn spawn_collector(self: &Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let stats = Arc::clone(self);
        let mut receiver = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => stats.record(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Stats collector lagged behind event bus");
                        stats.lagged_events.fetch_add(skipped, Ordering::Relaxed);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event bus closed, stats collector exiting");
                        break;
                    }
                }
            }
        })
    }
}
