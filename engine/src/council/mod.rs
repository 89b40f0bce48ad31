//! The council engine: one entry point that routes a prompt, dispatches
//! specialists under budget, votes, and escalates when local answers are
//! not good enough.
//!
//! ```text
//! RouteRequest
//!   │ Classifying   Classifier / caller candidates ──► RoutingDecision
//!   │ Dispatching   Dispatcher (BudgetGuard) ──► BallotBox | failure
//!   │ Fusing        VotingEngine::fuse ──► FusedAnswer
//!   │ Escalating    EscalationPolicy (once, last resort) ──► cloud ballot
//!   │ Fusing        re-fuse with the cloud ballot
//!   ▼ Done          RouteResponse
//! ```

pub mod state;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::budget::{Admission, BudgetGuard, BudgetState, Cost, RequestBudget, SharedBudget};
use crate::config::{ConfigError, EngineConfig, RoutingConfig};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::ensemble::{BallotBox, Contribution, FusedAnswer, VotingEngine};
use crate::error::{CallFailure, EngineError, FailureKind};
use crate::escalation::{EscalationPolicy, FallbackChain, LocalOutcome};
use crate::events::{preview, EventBus, RoutingEvent, SharedEventBus};
use crate::registry::{SharedSpecialist, SpecialistRegistry};
use crate::router::{Classifier, ConversationContext, RouteReason, RoutingDecision};

pub use state::{IllegalTransition, RequestPhase, RequestStateMachine, TransitionRecord};

/// Characters of the prompt kept in events and logs.
const PROMPT_PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteRequest {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Bypass classification and dispatch these specialists, in order
    #[serde(default)]
    pub candidate_specialists: Option<Vec<String>>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl RouteRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_candidates(mut self, names: &[&str]) -> Self {
        self.candidate_specialists = Some(names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Diagnostics describing how a response was produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestTrace {
    pub admission: Option<Admission>,
    pub transitions: Vec<TransitionRecord>,
    /// Attempts that produced no ballot, local and cloud
    pub failures: Vec<CallFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_trigger: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResponse {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub text: String,
    /// Specialist whose ballot led the fused answer
    pub model_used: String,
    pub confidence: f64,
    /// Every specialist dispatched for this request, in routing order
    pub candidates: Vec<String>,
    pub consensus_fusion: bool,
    pub latency_ms: u64,
    pub total_cost_cents: u64,
    pub contributors: Vec<Contribution>,
    pub escalated: bool,
    pub trace: RequestTrace,
}

/// Wire form of a handled request: a response or a terminal failure,
/// tagged by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EngineReply {
    Ok {
        status: String,
        #[serde(flatten)]
        response: Box<RouteResponse>,
    },
    Failed(EngineError),
}

impl From<Result<RouteResponse, EngineError>> for EngineReply {
    fn from(result: Result<RouteResponse, EngineError>) -> Self {
        match result {
            Ok(response) => Self::Ok {
                status: "ok".to_string(),
                response: Box::new(response),
            },
            Err(error) => Self::Failed(error),
        }
    }
}

pub struct CouncilEngine {
    registry: Arc<SpecialistRegistry>,
    classifier: Classifier,
    dispatcher: Dispatcher,
    voting: Arc<VotingEngine>,
    guard: BudgetGuard,
    escalation: EscalationPolicy,
    routing: RoutingConfig,
    events: SharedEventBus,
}

impl CouncilEngine {
    /// Assemble an engine from already-built parts.
    pub fn new(
        config: &EngineConfig,
        registry: SpecialistRegistry,
        cloud_tiers: Vec<SharedSpecialist>,
        budget: SharedBudget,
        events: SharedEventBus,
    ) -> Result<Self, ConfigError> {
        let registry = Arc::new(registry);
        let voting = Arc::new(VotingEngine::new(&config.voting));
        let classifier =
            Classifier::with_extra_rules(config.routing.comparison_count, &config.routing.extra_rules)?;
        let dispatcher = Dispatcher::new(
            registry.clone(),
            voting.clone(),
            config.dispatch.clone(),
            events.clone(),
        );
        let guard = BudgetGuard::new(
            budget,
            registry.cheapest_cost(),
            config.budget.latency_budget(),
        );
        let chain = cloud_tiers
            .into_iter()
            .fold(FallbackChain::new(), |chain, tier| chain.add_tier(tier));
        let escalation = EscalationPolicy::new(config.escalation.clone(), chain);

        info!(
            specialists = ?registry.names(),
            cloud_tiers = ?escalation.chain().names(),
            general = registry.general().name(),
            "Council engine ready"
        );

        Ok(Self {
            registry,
            classifier,
            dispatcher,
            voting,
            guard,
            escalation,
            routing: config.routing.clone(),
            events,
        })
    }

    /// Build specialists, registry, budget and bus from configuration.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut builder = SpecialistRegistry::builder();
        for definition in &config.specialists {
            builder = builder.register(definition.build()?);
        }
        if !config.routing.specialists_order.is_empty() {
            builder = builder.with_order(config.routing.specialists_order.clone());
        }
        let registry = builder.build()?;

        let cloud_tiers = config
            .cloud
            .iter()
            .map(|definition| definition.build())
            .collect::<Result<Vec<_>, _>>()?;

        let budget = BudgetState::new(config.budget.daily_cap(), config.budget.request_cap()).shared();
        Self::new(config, registry, cloud_tiers, budget, EventBus::new().shared())
    }

    pub fn registry(&self) -> &SpecialistRegistry {
        &self.registry
    }

    pub fn budget(&self) -> &SharedBudget {
        self.guard.state()
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    /// Routing decision for a request, without dispatching it.
    pub fn route(&self, request: &RouteRequest, history: Option<&ConversationContext>) -> RoutingDecision {
        request
            .candidate_specialists
            .as_deref()
            .and_then(|names| RoutingDecision::from_candidates(names, &self.registry))
            .unwrap_or_else(|| self.classifier.classify(&request.prompt, &self.registry, history))
    }

    pub async fn handle(&self, request: RouteRequest) -> Result<RouteResponse, EngineError> {
        self.handle_with_history(request, None).await
    }

    pub async fn handle_with_history(
        &self,
        request: RouteRequest,
        history: Option<&ConversationContext>,
    ) -> Result<RouteResponse, EngineError> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let mut phases = RequestStateMachine::new();
        let mut trace = RequestTrace::default();

        self.events.publish(RoutingEvent::RequestStarted {
            request_id: request_id.clone(),
            session_id: request.session_id.clone(),
            prompt_preview: preview(&request.prompt, PROMPT_PREVIEW_CHARS),
            timestamp: Utc::now(),
        });

        let decision = self.route(&request, history);
        let top_k = request.top_k.unwrap_or(self.routing.default_top_k).max(1);
        self.events.publish(RoutingEvent::RouteSelected {
            request_id: request_id.clone(),
            primary: decision.primary().name.clone(),
            candidates: decision.selected(top_k).iter().map(|e| e.name.clone()).collect(),
            ambiguous: decision.primary().reason == RouteReason::Fallback,
            timestamp: Utc::now(),
        });
        info!(
            request_id = %request_id,
            primary = %decision.primary().name,
            route = ?decision.names(),
            top_k,
            "Routing request"
        );

        let budget = self.guard.begin_request(&request_id);
        self.enter(&mut phases, RequestPhase::Dispatching, None);

        let dispatched = self
            .dispatcher
            .dispatch(&request.prompt, &decision, top_k, &self.guard, &budget)
            .await;
        let (mut ballots, mut candidates) = match dispatched {
            Ok(report) => {
                trace.admission = Some(report.admission);
                trace.failures.extend(report.failures);
                (Some(report.ballots), report.selected)
            }
            Err(DispatchError::BudgetDenied { .. }) => {
                trace.admission = Some(Admission::Deny);
                self.enter(&mut phases, RequestPhase::Denied, Some("budget denied"));
                return Err(self.fail(self.denied(&request_id)));
            }
            Err(DispatchError::Exhausted { failures }) => {
                trace.failures.extend(failures);
                let selected = decision.selected(top_k).iter().map(|e| e.name.clone()).collect();
                (None, selected)
            }
        };

        let mut fused = match &ballots {
            Some(box_) => {
                self.enter(&mut phases, RequestPhase::Fusing, None);
                self.voting.fuse(box_).ok()
            }
            None => None,
        };

        let local = match &ballots {
            Some(box_) => LocalOutcome::Ballots(box_),
            None => LocalOutcome::DispatchFailure,
        };
        let mut escalated = false;
        if let Some(trigger) = self.escalation.trigger(local, &self.guard, &budget) {
            let reason = trigger.to_string();
            self.enter(&mut phases, RequestPhase::Escalating, Some(&reason));
            trace.escalation_trigger = Some(reason.clone());
            self.events.publish(RoutingEvent::EscalationTriggered {
                request_id: request_id.clone(),
                trigger: reason,
                timestamp: Utc::now(),
            });

            match self.escalate(&request.prompt, &budget, &mut ballots).await {
                Ok((served_by, skipped)) => {
                    escalated = true;
                    trace.failures.extend(skipped);
                    candidates.push(served_by);
                    self.enter(&mut phases, RequestPhase::Fusing, Some("cloud ballot added"));
                    if let Some(box_) = &ballots {
                        fused = self.voting.fuse(box_).ok();
                    }
                }
                Err(failures) => {
                    warn!(
                        request_id = %request_id,
                        attempts = failures.len(),
                        "Escalation failed, keeping local answer"
                    );
                    trace.failures.extend(failures);
                    if fused.is_some() {
                        self.enter(&mut phases, RequestPhase::Fusing, Some("escalation failed"));
                    }
                }
            }
        }

        let Some(fused) = fused else {
            self.enter(&mut phases, RequestPhase::Exhausted, Some("no ballots"));
            return Err(self.fail(EngineError::AllRoutesExhausted {
                request_id,
                attempts: trace.failures,
            }));
        };

        self.enter(&mut phases, RequestPhase::Done, None);
        trace.transitions = phases.into_transitions();
        let ballot_count = ballots.as_ref().map_or(0, BallotBox::len);
        Ok(self.complete(request, request_id, fused, ballot_count, candidates, escalated, &budget, started, trace))
    }

    /// Run the cloud chain and add its ballot to the box. Returns the tier
    /// that answered and the tiers that failed before it.
    async fn escalate(
        &self,
        prompt: &str,
        budget: &RequestBudget,
        ballots: &mut Option<BallotBox>,
    ) -> Result<(String, Vec<CallFailure>), Vec<CallFailure>> {
        let outcome = self
            .escalation
            .escalate(
                prompt,
                self.dispatcher.config().call_timeout(),
                &self.guard,
                budget,
                &self.events,
            )
            .await?;

        let order = self.registry.len() + outcome.tier_index;
        let ballot = self.voting.ballot(outcome.result, order).map_err(|e| {
            let mut failures = outcome.failures.clone();
            failures.push(CallFailure::new(
                &outcome.served_by,
                FailureKind::InvalidConfidence,
                e.to_string(),
            ));
            failures
        })?;
        ballots.get_or_insert_with(BallotBox::new).push(ballot);
        Ok((outcome.served_by, outcome.failures))
    }

    #[allow(clippy::too_many_arguments)]
    fn complete(
        &self,
        request: RouteRequest,
        request_id: String,
        fused: FusedAnswer,
        ballots: usize,
        candidates: Vec<String>,
        escalated: bool,
        budget: &RequestBudget,
        started: Instant,
        trace: RequestTrace,
    ) -> RouteResponse {
        let latency_ms = started.elapsed().as_millis() as u64;
        let total_cost: Cost = budget.spent();

        self.events.publish(RoutingEvent::FusionCompleted {
            request_id: request_id.clone(),
            primary: fused.primary.clone(),
            confidence: fused.confidence,
            ballots,
            consensus_fusion: fused.consensus_fusion,
            timestamp: Utc::now(),
        });
        self.events.publish(RoutingEvent::RequestCompleted {
            request_id: request_id.clone(),
            model_used: fused.primary.clone(),
            escalated,
            latency_ms,
            total_cost,
            timestamp: Utc::now(),
        });
        info!(
            request_id = %request_id,
            model_used = %fused.primary,
            confidence = fused.confidence,
            consensus_fusion = fused.consensus_fusion,
            escalated,
            latency_ms,
            cost = %total_cost,
            "Request completed"
        );

        RouteResponse {
            request_id,
            session_id: request.session_id,
            text: fused.text,
            model_used: fused.primary,
            confidence: fused.confidence,
            candidates,
            consensus_fusion: fused.consensus_fusion,
            latency_ms,
            total_cost_cents: total_cost.whole_cents(),
            contributors: fused.contributors,
            escalated,
            trace,
        }
    }

    fn denied(&self, request_id: &str) -> EngineError {
        let snapshot = self.guard.state().snapshot();
        EngineError::BudgetDenied {
            request_id: request_id.to_string(),
            spent_today: snapshot.spent_today,
            daily_cap: snapshot.daily_cap,
            request_cap: snapshot.request_cap,
        }
    }

    fn fail(&self, error: EngineError) -> EngineError {
        warn!(request_id = error.request_id(), status = error.status(), "Request failed");
        self.events.publish(RoutingEvent::RequestFailed {
            request_id: error.request_id().to_string(),
            status: error.status().to_string(),
            timestamp: Utc::now(),
        });
        error
    }

    fn enter(&self, phases: &mut RequestStateMachine, to: RequestPhase, reason: Option<&str>) {
        if let Err(e) = phases.advance(to, reason) {
            warn!(error = %e, "Request phase out of order");
        }
    }
}
