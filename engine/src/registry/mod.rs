//! Specialist registry
//!
//! A specialist is any backend that turns a prompt into an answer: a local
//! model behind an HTTP endpoint, a deterministic evaluator, or a cloud
//! tier used only for escalation. Each declares a [`SpecialistProfile`]
//! (domain, base confidence, cost, expected latency) that the router and
//! budget guard plan against.
//!
//! The registry is built once and never mutated afterwards. Its
//! declaration order is the tie-break order for routing and voting.

pub mod arithmetic;
pub mod http;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::Cost;
use crate::error::FailureKind;

pub use arithmetic::ArithmeticSpecialist;
pub use http::{HttpEndpoint, HttpSpecialist};

/// Subject area a specialist is tuned for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Math,
    Code,
    Logic,
    Knowledge,
    General,
    /// Escalation tier outside the local registry.
    Cloud,
}

impl Domain {
    pub const ALL: [Domain; 6] = [
        Domain::Math,
        Domain::Code,
        Domain::Logic,
        Domain::Knowledge,
        Domain::General,
        Domain::Cloud,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Math => "math",
            Self::Code => "code",
            Self::Logic => "logic",
            Self::Knowledge => "knowledge",
            Self::General => "general",
            Self::Cloud => "cloud",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared contract of a specialist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistProfile {
    pub name: String,
    pub domain: Domain,
    /// Prior confidence in [0, 1], used when a reply carries none.
    pub base_confidence: f64,
    pub cost_per_call: Cost,
    pub expected_latency_ms: u64,
}

impl SpecialistProfile {
    pub fn new(name: impl Into<String>, domain: Domain, base_confidence: f64) -> Self {
        Self {
            name: name.into(),
            domain,
            base_confidence,
            cost_per_call: Cost::ZERO,
            expected_latency_ms: 1000,
        }
    }

    pub fn with_cost(mut self, cost: Cost) -> Self {
        self.cost_per_call = cost;
        self
    }

    pub fn with_expected_latency_ms(mut self, ms: u64) -> Self {
        self.expected_latency_ms = ms;
        self
    }

    pub fn expected_latency(&self) -> Duration {
        Duration::from_millis(self.expected_latency_ms)
    }
}

/// Raw answer from a specialist call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistReply {
    pub text: String,
    /// Self-reported confidence; `None` falls back to the base confidence.
    pub confidence: Option<f64>,
    /// Measured cost; `None` falls back to the declared cost per call.
    pub cost: Option<Cost>,
    pub tokens: Option<u32>,
    /// Underlying model, when it differs from the specialist name.
    pub model: Option<String>,
}

impl SpecialistReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
            cost: None,
            tokens: None,
            model: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_cost(mut self, cost: Cost) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Errors from a single specialist call
#[derive(Debug, Clone, Error)]
pub enum SpecialistError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("response parse error: {0}")]
    ParseError(String),

    #[error("prompt not supported: {0}")]
    Unsupported(String),

    #[error("cancelled at request deadline")]
    Cancelled,
}

impl SpecialistError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Error,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// A backend that answers prompts.
#[async_trait]
pub trait Specialist: Send + Sync {
    fn profile(&self) -> &SpecialistProfile;

    async fn call(&self, prompt: &str) -> Result<SpecialistReply, SpecialistError>;

    fn name(&self) -> &str {
        &self.profile().name
    }
}

/// Shared reference to a Specialist
pub type SharedSpecialist = Arc<dyn Specialist>;

/// Errors raised while building a registry
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("registry has no specialists")]
    Empty,

    #[error("duplicate specialist name: {0}")]
    DuplicateName(String),

    #[error("specialist {name} has base confidence {value} outside [0, 1]")]
    InvalidBaseConfidence { name: String, value: f64 },

    #[error("no general-domain specialist registered")]
    NoGeneralSpecialist,

    #[error("specialists_order names unknown specialist: {0}")]
    UnknownInOrder(String),

    #[error("cloud-domain specialist {0} cannot be registered locally")]
    CloudInRegistry(String),
}

/// Ordered, immutable set of local specialists.
pub struct SpecialistRegistry {
    entries: Vec<SharedSpecialist>,
    by_name: HashMap<String, usize>,
    general: usize,
}

impl std::fmt::Debug for SpecialistRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecialistRegistry")
            .field("order", &self.names())
            .field("general", &self.general)
            .finish()
    }
}

impl SpecialistRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SharedSpecialist> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn by_index(&self, index: usize) -> Option<&SharedSpecialist> {
        self.entries.get(index)
    }

    /// Specialists in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &SharedSpecialist> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|s| s.name()).collect()
    }

    /// First general-domain specialist in declaration order.
    pub fn general(&self) -> &SharedSpecialist {
        &self.entries[self.general]
    }

    pub fn general_index(&self) -> usize {
        self.general
    }

    /// Lowest declared cost per call across the registry.
    pub fn cheapest_cost(&self) -> Cost {
        self.entries
            .iter()
            .map(|s| s.profile().cost_per_call)
            .min()
            .unwrap_or(Cost::ZERO)
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<SharedSpecialist>,
    order: Option<Vec<String>>,
}

impl RegistryBuilder {
    pub fn register(mut self, specialist: SharedSpecialist) -> Self {
        self.entries.push(specialist);
        self
    }

    /// Explicit declaration order. Registered specialists not listed keep
    /// their registration order after the listed ones.
    pub fn with_order(mut self, order: Vec<String>) -> Self {
        self.order = Some(order);
        self
    }

    pub fn build(self) -> Result<SpecialistRegistry, RegistryError> {
        if self.entries.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut seen = HashMap::new();
        for (i, specialist) in self.entries.iter().enumerate() {
            let profile = specialist.profile();
            if seen.insert(profile.name.clone(), i).is_some() {
                return Err(RegistryError::DuplicateName(profile.name.clone()));
            }
            if !(0.0..=1.0).contains(&profile.base_confidence) {
                return Err(RegistryError::InvalidBaseConfidence {
                    name: profile.name.clone(),
                    value: profile.base_confidence,
                });
            }
            if profile.domain == Domain::Cloud {
                return Err(RegistryError::CloudInRegistry(profile.name.clone()));
            }
        }

        let mut slots: Vec<Option<SharedSpecialist>> = self.entries.into_iter().map(Some).collect();
        let mut entries = Vec::with_capacity(slots.len());
        for name in self.order.unwrap_or_default() {
            let i = *seen
                .get(&name)
                .ok_or_else(|| RegistryError::UnknownInOrder(name.clone()))?;
            if let Some(specialist) = slots[i].take() {
                entries.push(specialist);
            }
        }
        entries.extend(slots.into_iter().flatten());

        let general = entries
            .iter()
            .position(|s| s.profile().domain == Domain::General)
            .ok_or(RegistryError::NoGeneralSpecialist)?;

        let by_name = entries
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name().to_string(), i))
            .collect();

        Ok(SpecialistRegistry {
            entries,
            by_name,
            general,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(SpecialistProfile);

    #[async_trait]
    impl Specialist for Echo {
        fn profile(&self) -> &SpecialistProfile {
            &self.0
        }

        async fn call(&self, prompt: &str) -> Result<SpecialistReply, SpecialistError> {
            Ok(SpecialistReply::text(prompt))
        }
    }

    fn echo(name: &str, domain: Domain, cents: f64) -> SharedSpecialist {
        Arc::new(Echo(
            SpecialistProfile::new(name, domain, 0.7).with_cost(Cost::from_cents(cents)),
        ))
    }

    #[test]
    fn test_build_keeps_registration_order() {
        let registry = SpecialistRegistry::builder()
            .register(echo("math", Domain::Math, 1.0))
            .register(echo("general", Domain::General, 2.0))
            .register(echo("code", Domain::Code, 0.5))
            .build()
            .unwrap();

        assert_eq!(registry.names(), vec!["math", "general", "code"]);
        assert_eq!(registry.general().name(), "general");
        assert_eq!(registry.general_index(), 1);
        assert_eq!(registry.cheapest_cost(), Cost::from_cents(0.5));
        assert_eq!(registry.index_of("code"), Some(2));
    }

    #[test]
    fn test_explicit_order_wins() {
        let registry = SpecialistRegistry::builder()
            .register(echo("general", Domain::General, 1.0))
            .register(echo("math", Domain::Math, 1.0))
            .register(echo("code", Domain::Code, 1.0))
            .with_order(vec!["math".into(), "code".into()])
            .build()
            .unwrap();

        assert_eq!(registry.names(), vec!["math", "code", "general"]);
    }

    #[test]
    fn test_missing_general_is_fatal() {
        let err = SpecialistRegistry::builder()
            .register(echo("math", Domain::Math, 1.0))
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::NoGeneralSpecialist);
    }

    #[test]
    fn test_rejects_duplicates_and_bad_confidence() {
        let err = SpecialistRegistry::builder()
            .register(echo("general", Domain::General, 1.0))
            .register(echo("general", Domain::General, 1.0))
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateName("general".into()));

        let bad = Arc::new(Echo(SpecialistProfile::new("g", Domain::General, 1.2)));
        let err = SpecialistRegistry::builder().register(bad).build().unwrap_err();
        assert!(matches!(err, RegistryError::InvalidBaseConfidence { .. }));

        assert_eq!(
            SpecialistRegistry::builder().build().unwrap_err(),
            RegistryError::Empty
        );
    }

    #[test]
    fn test_unknown_name_in_order() {
        let err = SpecialistRegistry::builder()
            .register(echo("general", Domain::General, 1.0))
            .with_order(vec!["nope".into()])
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::UnknownInOrder("nope".into()));
    }
}
