//! Admission control against the daily and per-request caps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::SharedBudget;
use super::Cost;

/// Outcome of a budget check before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// Full concurrent dispatch fits both caps and the latency budget.
    Admit,
    /// Only a reduced, sequential dispatch fits.
    Downgrade,
    /// Not even the cheapest specialist fits.
    Deny,
}

impl std::fmt::Display for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admit => write!(f, "admit"),
            Self::Downgrade => write!(f, "downgrade"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// Spend attributed to a single request.
#[derive(Debug)]
pub struct RequestBudget {
    request_id: String,
    cap: Cost,
    spent: AtomicU64,
}

impl RequestBudget {
    pub fn new(request_id: impl Into<String>, cap: Cost) -> Self {
        Self {
            request_id: request_id.into(),
            cap,
            spent: AtomicU64::new(0),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn cap(&self) -> Cost {
        self.cap
    }

    pub fn spent(&self) -> Cost {
        Cost::from_millicents(self.spent.load(Ordering::SeqCst))
    }

    pub fn remaining(&self) -> Cost {
        self.cap.saturating_sub(self.spent())
    }

    fn add(&self, cost: Cost) {
        self.spent.fetch_add(cost.millicents(), Ordering::SeqCst);
    }
}

/// Checks estimated dispatch cost against remaining headroom and records
/// actual spend once calls complete.
#[derive(Debug, Clone)]
pub struct BudgetGuard {
    state: SharedBudget,
    cheapest_call: Cost,
    latency_budget: Duration,
}

impl BudgetGuard {
    pub fn new(state: SharedBudget, cheapest_call: Cost, latency_budget: Duration) -> Self {
        Self {
            state,
            cheapest_call,
            latency_budget,
        }
    }

    pub fn state(&self) -> &SharedBudget {
        &self.state
    }

    pub fn cheapest_call(&self) -> Cost {
        self.cheapest_call
    }

    pub fn latency_budget(&self) -> Duration {
        self.latency_budget
    }

    /// Open a per-request account capped at the configured request cap.
    pub fn begin_request(&self, request_id: &str) -> RequestBudget {
        RequestBudget::new(request_id, self.state.request_cap())
    }

    pub fn admit(
        &self,
        request: &RequestBudget,
        estimated_cost: Cost,
        estimated_latency: Duration,
    ) -> Admission {
        self.admit_on(
            Utc::now().date_naive(),
            request,
            estimated_cost,
            estimated_latency,
        )
    }

    pub fn admit_on(
        &self,
        day: NaiveDate,
        request: &RequestBudget,
        estimated_cost: Cost,
        estimated_latency: Duration,
    ) -> Admission {
        let remaining_today = self.state.remaining_on(day);
        let remaining_request = request.remaining();
        let fits = |cost: Cost| cost <= remaining_today && cost <= remaining_request;

        let admission = if !fits(self.cheapest_call) {
            Admission::Deny
        } else if fits(estimated_cost) && estimated_latency <= self.latency_budget {
            Admission::Admit
        } else {
            Admission::Downgrade
        };

        debug!(
            request_id = request.request_id(),
            estimated_cost = %estimated_cost,
            estimated_latency_ms = estimated_latency.as_millis() as u64,
            remaining_today = %remaining_today,
            remaining_request = %remaining_request,
            %admission,
            "Budget admission"
        );
        admission
    }

    /// Whether one more call costing `cost` fits both caps right now.
    pub fn has_headroom(&self, request: &RequestBudget, cost: Cost) -> bool {
        cost <= self.state.remaining_today() && cost <= request.remaining()
    }

    /// Charge a completed call to both the daily state and the request.
    pub fn record(&self, request: &RequestBudget, specialist: &str, cost: Cost) {
        request.add(cost);
        self.state.charge(specialist, request.request_id(), cost);
    }
}
