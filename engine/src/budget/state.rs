//! Process-wide spend counters with UTC day rollover.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ledger::{CostLedger, LedgerEntry};
use super::Cost;

/// Shared reference to BudgetState
pub type SharedBudget = Arc<BudgetState>;

#[derive(Debug)]
struct Counters {
    day: NaiveDate,
    spent_today: Cost,
    call_count: u64,
    ledger: CostLedger,
}

impl Counters {
    /// Move to `day` if it is later than the current one. A clock that
    /// steps backwards keeps charging the current day.
    fn roll_to(&mut self, day: NaiveDate) {
        if day > self.day {
            info!(
                previous_day = %self.day,
                new_day = %day,
                spent = %self.spent_today,
                calls = self.call_count,
                "Daily budget rolled over"
            );
            self.day = day;
            self.spent_today = Cost::ZERO;
            self.call_count = 0;
        }
    }
}

/// Point-in-time view of the daily counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub day: NaiveDate,
    pub spent_today: Cost,
    pub remaining_today: Cost,
    pub daily_cap: Cost,
    pub request_cap: Cost,
    pub call_count: u64,
}

/// Daily spend shared by every in-flight request.
///
/// All mutation happens under one mutex, so concurrent charges never lose
/// an update and `spent_today` only grows within a day.
#[derive(Debug)]
pub struct BudgetState {
    daily_cap: Cost,
    request_cap: Cost,
    inner: Mutex<Counters>,
}

impl BudgetState {
    pub fn new(daily_cap: Cost, request_cap: Cost) -> Self {
        Self::starting_on(daily_cap, request_cap, Utc::now().date_naive())
    }

    /// Create state anchored to a specific day (useful for tests).
    pub fn starting_on(daily_cap: Cost, request_cap: Cost, day: NaiveDate) -> Self {
        Self {
            daily_cap,
            request_cap,
            inner: Mutex::new(Counters {
                day,
                spent_today: Cost::ZERO,
                call_count: 0,
                ledger: CostLedger::new(),
            }),
        }
    }

    pub fn shared(self) -> SharedBudget {
        Arc::new(self)
    }

    pub fn daily_cap(&self) -> Cost {
        self.daily_cap
    }

    pub fn request_cap(&self) -> Cost {
        self.request_cap
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // Counters are plain values; a poisoned lock still holds valid state.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Charge `cost` to today.
    pub fn charge(&self, specialist: &str, request_id: &str, cost: Cost) -> BudgetSnapshot {
        self.charge_on(Utc::now().date_naive(), specialist, request_id, cost)
    }

    /// Charge `cost` as of `day`, rolling the counters first if needed.
    pub fn charge_on(
        &self,
        day: NaiveDate,
        specialist: &str,
        request_id: &str,
        cost: Cost,
    ) -> BudgetSnapshot {
        let mut counters = self.lock();
        counters.roll_to(day);
        counters.spent_today += cost;
        counters.call_count += 1;
        counters.ledger.append(LedgerEntry {
            specialist: specialist.to_string(),
            request_id: request_id.to_string(),
            cost,
            at: Utc::now(),
        });
        debug!(
            specialist,
            request_id,
            cost = %cost,
            spent_today = %counters.spent_today,
            "Charged specialist call"
        );
        self.snapshot_locked(&counters)
    }

    pub fn remaining_today(&self) -> Cost {
        self.remaining_on(Utc::now().date_naive())
    }

    pub fn remaining_on(&self, day: NaiveDate) -> Cost {
        let mut counters = self.lock();
        counters.roll_to(day);
        self.daily_cap.saturating_sub(counters.spent_today)
    }

    pub fn spent_today(&self) -> Cost {
        self.snapshot().spent_today
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        self.snapshot_on(Utc::now().date_naive())
    }

    pub fn snapshot_on(&self, day: NaiveDate) -> BudgetSnapshot {
        let mut counters = self.lock();
        counters.roll_to(day);
        self.snapshot_locked(&counters)
    }

    fn snapshot_locked(&self, counters: &Counters) -> BudgetSnapshot {
        BudgetSnapshot {
            day: counters.day,
            spent_today: counters.spent_today,
            remaining_today: self.daily_cap.saturating_sub(counters.spent_today),
            daily_cap: self.daily_cap,
            request_cap: self.request_cap,
            call_count: counters.call_count,
        }
    }

    /// Explicit reset for an external scheduler. The ledger is kept.
    pub fn reset_daily(&self, day: NaiveDate) {
        let mut counters = self.lock();
        counters.day = day;
        counters.spent_today = Cost::ZERO;
        counters.call_count = 0;
        info!(day = %day, "Daily budget reset");
    }

    pub fn cost_by_specialist(&self) -> BTreeMap<String, Cost> {
        self.lock().ledger.cost_by_specialist()
    }

    /// Copy of the full ledger.
    pub fn ledger(&self) -> CostLedger {
        self.lock().ledger.clone()
    }
}
