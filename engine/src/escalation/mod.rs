//! Cloud escalation
//!
//! Decides whether a request that local specialists answered poorly (or
//! not at all) should be retried against paid cloud tiers, and runs the
//! tiers as a fallback chain when it should.

pub mod chain;
pub mod policy;

pub use chain::{ChainOutcome, DegradationLevel, FallbackChain};
pub use policy::{EscalationPolicy, EscalationTrigger, LocalOutcome};
