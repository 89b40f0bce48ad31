//! Append-only record of every charged call.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Cost;

/// One charged specialist call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub specialist: String,
    pub request_id: String,
    pub cost: Cost,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostLedger {
    entries: Vec<LedgerEntry>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> Cost {
        self.entries.iter().map(|e| e.cost).sum()
    }

    /// Spend grouped by specialist name, sorted by name.
    pub fn cost_by_specialist(&self) -> BTreeMap<String, Cost> {
        let mut breakdown = BTreeMap::new();
        for entry in &self.entries {
            *breakdown.entry(entry.specialist.clone()).or_insert(Cost::ZERO) += entry.cost;
        }
        breakdown
    }

    /// Entries charged to a single request, in charge order.
    pub fn for_request<'a>(&'a self, request_id: &'a str) -> impl Iterator<Item = &'a LedgerEntry> {
        self.entries.iter().filter(move |e| e.request_id == request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(specialist: &str, request_id: &str, cents: f64) -> LedgerEntry {
        LedgerEntry {
            specialist: specialist.to_string(),
            request_id: request_id.to_string(),
            cost: Cost::from_cents(cents),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_cost_by_specialist() {
        let mut ledger = CostLedger::new();
        ledger.append(entry("math", "r1", 1.0));
        ledger.append(entry("general", "r1", 2.5));
        ledger.append(entry("math", "r2", 1.0));

        let breakdown = ledger.cost_by_specialist();
        assert_eq!(breakdown["math"], Cost::from_cents(2.0));
        assert_eq!(breakdown["general"], Cost::from_cents(2.5));
        assert_eq!(ledger.total(), Cost::from_cents(4.5));
    }

    #[test]
    fn test_for_request_filters() {
        let mut ledger = CostLedger::new();
        ledger.append(entry("math", "r1", 1.0));
        ledger.append(entry("math", "r2", 1.0));
        ledger.append(entry("code", "r1", 3.0));

        let names: Vec<_> = ledger.for_request("r1").map(|e| e.specialist.as_str()).collect();
        assert_eq!(names, vec!["math", "code"]);
    }
}
