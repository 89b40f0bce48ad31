//! Council Engine: specialist routing and consensus voting
//!
//! Routes each prompt to a council of domain specialists (math, code,
//! logic, knowledge, general), dispatches them concurrently under daily
//! and per-request budgets, weights their answers by confidence and
//! length, and fuses a single response. Cloud tiers are consulted only as
//! a last resort.
//!
//! # Modules
//!
//! - `registry`: specialist trait, profiles, and the ordered registry
//! - `router`: lexical intent classification and comparison fill
//! - `dispatch`: budget-guarded concurrent fan-out with timeouts
//! - `ensemble`: ballot weighting, repetition guard, rule-based fusion
//! - `budget`: cost accounting, daily rollover, admission control
//! - `escalation`: last-resort cloud fallback chain
//! - `events`: broadcast event bus and running stats
//! - `council`: the request lifecycle tying it all together

pub mod budget;
pub mod config;
pub mod council;
pub mod dispatch;
pub mod ensemble;
pub mod error;
pub mod escalation;
pub mod events;
pub mod registry;
pub mod router;

pub use budget::{Admission, BudgetGuard, BudgetState, Cost, RequestBudget, SharedBudget};
pub use config::{ConfigError, EngineConfig};
pub use council::{CouncilEngine, EngineReply, RequestPhase, RouteRequest, RouteResponse};
pub use dispatch::{DispatchError, Dispatcher};
pub use ensemble::{Ballot, BallotBox, FusedAnswer, SpecialistResult, VotingEngine};
pub use error::{CallFailure, EngineError, FailureKind};
pub use escalation::{EscalationPolicy, FallbackChain};
pub use events::{EventBus, RoutingEvent, RoutingStats, SharedEventBus, StatsSnapshot};
pub use registry::{
    Domain, SharedSpecialist, Specialist, SpecialistError, SpecialistProfile, SpecialistRegistry,
    SpecialistReply,
};
pub use router::{Classifier, ConversationContext, RoutingDecision};
