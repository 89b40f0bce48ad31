//! Events emitted while a request is routed, dispatched and fused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::{Admission, Cost};
use crate::error::FailureKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingEvent {
    RequestStarted {
        request_id: String,
        session_id: Option<String>,
        prompt_preview: String,
        timestamp: DateTime<Utc>,
    },

    RouteSelected {
        request_id: String,
        primary: String,
        candidates: Vec<String>,
        ambiguous: bool,
        timestamp: DateTime<Utc>,
    },

    BudgetDecision {
        request_id: String,
        admission: Admission,
        estimated_cost: Cost,
        timestamp: DateTime<Utc>,
    },

    SpecialistCompleted {
        request_id: String,
        specialist: String,
        latency_ms: u64,
        cost: Cost,
        timestamp: DateTime<Utc>,
    },

    SpecialistFailed {
        request_id: String,
        specialist: String,
        kind: FailureKind,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    BallotDropped {
        request_id: String,
        specialist: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    EscalationTriggered {
        request_id: String,
        trigger: String,
        timestamp: DateTime<Utc>,
    },

    FusionCompleted {
        request_id: String,
        primary: String,
        confidence: f64,
        ballots: usize,
        consensus_fusion: bool,
        timestamp: DateTime<Utc>,
    },

    RequestCompleted {
        request_id: String,
        model_used: String,
        escalated: bool,
        latency_ms: u64,
        total_cost: Cost,
        timestamp: DateTime<Utc>,
    },

    RequestFailed {
        request_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

impl RoutingEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RequestStarted { .. } => "request_started",
            Self::RouteSelected { .. } => "route_selected",
            Self::BudgetDecision { .. } => "budget_decision",
            Self::SpecialistCompleted { .. } => "specialist_completed",
            Self::SpecialistFailed { .. } => "specialist_failed",
            Self::BallotDropped { .. } => "ballot_dropped",
            Self::EscalationTriggered { .. } => "escalation_triggered",
            Self::FusionCompleted { .. } => "fusion_completed",
            Self::RequestCompleted { .. } => "request_completed",
            Self::RequestFailed { .. } => "request_failed",
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Self::RequestStarted { request_id, .. }
            | Self::RouteSelected { request_id, .. }
            | Self::BudgetDecision { request_id, .. }
            | Self::SpecialistCompleted { request_id, .. }
            | Self::SpecialistFailed { request_id, .. }
            | Self::BallotDropped { request_id, .. }
            | Self::EscalationTriggered { request_id, .. }
            | Self::FusionCompleted { request_id, .. }
            | Self::RequestCompleted { request_id, .. }
            | Self::RequestFailed { request_id, .. } => request_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::RequestStarted { timestamp, .. }
            | Self::RouteSelected { timestamp, .. }
            | Self::BudgetDecision { timestamp, .. }
            | Self::SpecialistCompleted { timestamp, .. }
            | Self::SpecialistFailed { timestamp, .. }
            | Self::BallotDropped { timestamp, .. }
            | Self::EscalationTriggered { timestamp, .. }
            | Self::FusionCompleted { timestamp, .. }
            | Self::RequestCompleted { timestamp, .. }
            | Self::RequestFailed { timestamp, .. } => *timestamp,
        }
    }
}

/// First `max_chars` characters of a prompt, for logs and events.
pub fn preview(prompt: &str, max_chars: usize) -> String {
    let mut chars = prompt.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
