//! Boundary errors returned to callers of the engine, plus the failure
//! records that travel inside them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::Cost;

/// Why a single specialist attempt produced no ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The per-call timeout elapsed.
    Timeout,
    /// The aggregate request deadline cut the call off.
    Cancelled,
    /// The specialist returned an error.
    Error,
    /// The reply carried a NaN or infinite confidence.
    InvalidConfidence,
    /// Never started because headroom ran out during a downgraded dispatch.
    SkippedBudget,
    /// Never started because the request deadline had already passed.
    SkippedDeadline,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Error => write!(f, "error"),
            Self::InvalidConfidence => write!(f, "invalid_confidence"),
            Self::SkippedBudget => write!(f, "skipped_budget"),
            Self::SkippedDeadline => write!(f, "skipped_deadline"),
        }
    }
}

/// A specialist attempt that did not contribute a ballot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFailure {
    pub specialist: String,
    pub kind: FailureKind,
    pub detail: String,
    pub latency_ms: u64,
}

impl CallFailure {
    pub fn new(specialist: &str, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            specialist: specialist.to_string(),
            kind,
            detail: detail.into(),
            latency_ms: 0,
        }
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

/// Terminal failures of a routed request.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EngineError {
    /// Not even the cheapest specialist fits the remaining budget.
    #[error("budget denied for request {request_id}: {spent_today} of {daily_cap} spent today")]
    BudgetDenied {
        request_id: String,
        spent_today: Cost,
        daily_cap: Cost,
        request_cap: Cost,
    },

    /// Local specialists and every escalation tier failed.
    #[error("all routes exhausted for request {request_id} after {} attempts", attempts.len())]
    AllRoutesExhausted {
        request_id: String,
        attempts: Vec<CallFailure>,
    },
}

impl EngineError {
    pub fn request_id(&self) -> &str {
        match self {
            Self::BudgetDenied { request_id, .. } | Self::AllRoutesExhausted { request_id, .. } => {
                request_id
            }
        }
    }

    /// Stable machine-readable status string.
    pub fn status(&self) -> &'static str {
        match self {
            Self::BudgetDenied { .. } => "budget_denied",
            Self::AllRoutesExhausted { .. } => "all_routes_exhausted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_serializes_with_status_tag() {
        let err = EngineError::AllRoutesExhausted {
            request_id: "r1".into(),
            attempts: vec![CallFailure::new("math", FailureKind::Timeout, "5s")],
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "all_routes_exhausted");
        assert_eq!(json["attempts"][0]["kind"], "timeout");
        assert_eq!(err.status(), "all_routes_exhausted");
        assert!(err.to_string().contains("after 1 attempts"));
    }
}
