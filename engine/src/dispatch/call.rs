//! One timed specialist call, and how its outcome is charged and reported.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::budget::{BudgetGuard, RequestBudget};
use crate::ensemble::SpecialistResult;
use crate::error::CallFailure;
use crate::events::{RoutingEvent, SharedEventBus};
use crate::registry::{SharedSpecialist, SpecialistError, SpecialistReply};

pub(crate) struct CallOutcome {
    pub slot: usize,
    pub specialist: SharedSpecialist,
    pub latency: Duration,
    pub result: Result<SpecialistReply, SpecialistError>,
}

/// Call `specialist`, giving up after `call_timeout`.
pub(crate) async fn run_call(
    slot: usize,
    specialist: SharedSpecialist,
    prompt: Arc<str>,
    call_timeout: Duration,
) -> CallOutcome {
    let start = Instant::now();
    let result = match tokio::time::timeout(call_timeout, specialist.call(&prompt)).await {
        Ok(result) => result,
        Err(_) => Err(SpecialistError::Timeout(call_timeout)),
    };
    CallOutcome {
        slot,
        specialist,
        latency: start.elapsed(),
        result,
    }
}

/// Charge a completed call and convert it to a result, or record why it
/// failed. Failed calls are not charged.
pub(crate) fn settle(
    outcome: CallOutcome,
    guard: &BudgetGuard,
    budget: &RequestBudget,
    events: &SharedEventBus,
) -> Result<SpecialistResult, CallFailure> {
    let profile = outcome.specialist.profile();
    let request_id = budget.request_id().to_string();
    let latency_ms = outcome.latency.as_millis() as u64;

    match outcome.result {
        Ok(reply) => {
            let result = SpecialistResult::from_reply(profile, reply, outcome.latency);
            guard.record(budget, &result.specialist, result.cost);
            debug!(
                request_id = %request_id,
                specialist = %result.specialist,
                latency_ms,
                cost = %result.cost,
                chars = result.length,
                "Specialist completed"
            );
            events.publish(RoutingEvent::SpecialistCompleted {
                request_id,
                specialist: result.specialist.clone(),
                latency_ms,
                cost: result.cost,
                timestamp: Utc::now(),
            });
            Ok(result)
        }
        Err(error) => {
            let failure = CallFailure::new(&profile.name, error.kind(), error.to_string())
                .with_latency_ms(latency_ms);
            warn!(
                request_id = %request_id,
                specialist = %profile.name,
                kind = %failure.kind,
                error = %error,
                "Specialist call failed"
            );
            events.publish(RoutingEvent::SpecialistFailed {
                request_id,
                specialist: failure.specialist.clone(),
                kind: failure.kind,
                detail: failure.detail.clone(),
                timestamp: Utc::now(),
            });
            Err(failure)
        }
    }
}
