//! Shared fixtures: scripted specialists and engine assembly helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use council_engine::budget::{BudgetState, Cost};
use council_engine::config::EngineConfig;
use council_engine::events::EventBus;
use council_engine::registry::{
    Domain, SharedSpecialist, Specialist, SpecialistError, SpecialistProfile, SpecialistRegistry,
    SpecialistReply,
};
use council_engine::CouncilEngine;

/// Specialist that sleeps, then answers (or fails) exactly as told.
pub struct Scripted {
    profile: SpecialistProfile,
    answer: Result<String, SpecialistError>,
    confidence: Option<f64>,
    delay: Duration,
    calls: AtomicUsize,
}

impl Scripted {
    pub fn new(name: &str, domain: Domain, base_confidence: f64) -> Self {
        Self {
            profile: SpecialistProfile::new(name, domain, base_confidence)
                .with_cost(Cost::from_cents(1.0))
                .with_expected_latency_ms(200),
            answer: Ok(format!("{name} has no opinion")),
            confidence: None,
            delay: Duration::from_millis(10),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn answer(mut self, text: &str) -> Self {
        self.answer = Ok(text.to_string());
        self
    }

    pub fn failing(mut self, error: SpecialistError) -> Self {
        self.answer = Err(error);
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    pub fn cost_cents(mut self, cents: f64) -> Self {
        self.profile = self.profile.with_cost(Cost::from_cents(cents));
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Specialist for Scripted {
    fn profile(&self) -> &SpecialistProfile {
        &self.profile
    }

    async fn call(&self, _prompt: &str) -> Result<SpecialistReply, SpecialistError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let text = self.answer.clone()?;
        let reply = SpecialistReply::text(text);
        Ok(match self.confidence {
            Some(c) => reply.with_confidence(c),
            None => reply,
        })
    }
}

/// The five-domain council used by most tests, answering "What is 15 * 23?".
pub fn arithmetic_council() -> Vec<Arc<Scripted>> {
    vec![
        Scripted::new("math", Domain::Math, 0.95).answer("345").shared(),
        Scripted::new("code", Domain::Code, 0.8).answer("345").shared(),
        Scripted::new("logic", Domain::Logic, 0.75).answer("345.").shared(),
        Scripted::new("knowledge", Domain::Knowledge, 0.7)
            .answer("Multiplication is repeated addition.")
            .shared(),
        Scripted::new("general", Domain::General, 0.6)
            .answer("15 times 23 equals 345.")
            .shared(),
    ]
}

pub fn registry(specialists: &[Arc<Scripted>]) -> SpecialistRegistry {
    specialists
        .iter()
        .fold(SpecialistRegistry::builder(), |builder, s| {
            builder.register(s.clone() as SharedSpecialist)
        })
        .build()
        .expect("valid registry")
}

/// Engine with generous budgets unless the config says otherwise.
pub fn engine_with(
    config: &EngineConfig,
    specialists: &[Arc<Scripted>],
    cloud: &[Arc<Scripted>],
) -> CouncilEngine {
    let budget = BudgetState::new(config.budget.daily_cap(), config.budget.request_cap()).shared();
    let cloud = cloud.iter().map(|s| s.clone() as SharedSpecialist).collect();
    CouncilEngine::new(config, registry(specialists), cloud, budget, EventBus::new().shared())
        .expect("engine builds")
}

pub fn engine(specialists: &[Arc<Scripted>]) -> CouncilEngine {
    engine_with(&roomy_config(), specialists, &[])
}

pub fn roomy_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.budget.daily_cap_cents = 1000.0;
    config.budget.request_cap_cents = 100.0;
    config
}
