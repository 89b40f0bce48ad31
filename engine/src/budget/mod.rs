//! Budget accounting for specialist calls
//!
//! Two caps bound spend: a daily cap shared by every request the process
//! serves, and a per-request cap. Both are enforced by [`BudgetGuard`]
//! before a dispatch starts, and charged by [`BudgetState`] only after a
//! call completes with its actual cost.
//!
//! ```text
//! dispatch ──► BudgetGuard::admit ──► Admit | Downgrade | Deny
//!                    │
//!   call completes ──┴──► BudgetGuard::record ──► BudgetState (daily)
//!                                              └► RequestBudget (per request)
//! ```
//!
//! Amounts are held as integer millicents so concurrent sums are exact.

pub mod guard;
pub mod ledger;
pub mod state;

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

pub use guard::{Admission, BudgetGuard, RequestBudget};
pub use ledger::{CostLedger, LedgerEntry};
pub use state::{BudgetSnapshot, BudgetState, SharedBudget};

/// A monetary amount in thousandths of a cent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cost(u64);

impl Cost {
    pub const ZERO: Cost = Cost(0);

    /// Convert from fractional cents. Negative or non-finite input is zero.
    pub fn from_cents(cents: f64) -> Self {
        if !cents.is_finite() || cents <= 0.0 {
            return Self::ZERO;
        }
        Cost((cents * 1000.0).round() as u64)
    }

    pub fn from_millicents(millicents: u64) -> Self {
        Cost(millicents)
    }

    pub fn millicents(self) -> u64 {
        self.0
    }

    pub fn as_cents(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Whole cents, rounded up. Used for response reporting.
    pub fn whole_cents(self) -> u64 {
        self.0.div_ceil(1000)
    }

    pub fn saturating_sub(self, other: Cost) -> Cost {
        Cost(self.0.saturating_sub(other.0))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        Cost(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Cost {
    fn add_assign(&mut self, rhs: Cost) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sum for Cost {
    fn sum<I: Iterator<Item = Cost>>(iter: I) -> Cost {
        iter.fold(Cost::ZERO, |acc, c| acc + c)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}c", self.as_cents())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents_rounds_to_millicents() {
        assert_eq!(Cost::from_cents(1.5).millicents(), 1500);
        assert_eq!(Cost::from_cents(0.0004).millicents(), 0);
        assert_eq!(Cost::from_cents(-3.0), Cost::ZERO);
        assert_eq!(Cost::from_cents(f64::NAN), Cost::ZERO);
    }

    #[test]
    fn test_whole_cents_rounds_up() {
        assert_eq!(Cost::from_cents(2.0).whole_cents(), 2);
        assert_eq!(Cost::from_cents(2.001).whole_cents(), 3);
        assert_eq!(Cost::ZERO.whole_cents(), 0);
    }

    #[test]
    fn test_sum_is_exact() {
        let total: Cost = (0..1000).map(|_| Cost::from_cents(0.1)).sum();
        assert_eq!(total, Cost::from_cents(100.0));
    }
}
