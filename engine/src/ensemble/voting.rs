//! Ballot weighting
//!
//! A ballot's weight is its confidence scaled by how informative its length
//! is for its domain, so a terse correct-looking answer cannot beat a
//! complete one on self-reported confidence alone:
//!
//! ```text
//! weight = confidence × length_penalty(len, domain) [× repetition_penalty]
//!
//! length_penalty
//!   1.0 ┤                 ┌──────────
//!       │             ┌───┘
//!   0.7 ┤         ┌───┘
//!   0.4 ┤─────────┘
//!       └─────────┬───────┬──────────► chars
//!                min     saturation
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::quality;
use crate::budget::Cost;
use crate::config::{LengthProfile, VotingConfig};
use crate::registry::{Domain, SpecialistProfile, SpecialistReply};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VotingError {
    #[error("no ballots to fuse")]
    Empty,

    #[error("specialist {specialist} reported non-finite confidence {value}")]
    InvalidConfidence { specialist: String, value: f64 },
}

/// Result type for voting operations
pub type VotingResult<T> = Result<T, VotingError>;

/// A completed specialist call, ready to be weighted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistResult {
    pub specialist: String,
    pub domain: Domain,
    pub text: String,
    pub confidence: f64,
    /// Length of `text` in characters
    pub length: usize,
    pub tokens: Option<u32>,
    pub latency_ms: u64,
    pub cost: Cost,
    pub model: Option<String>,
}

impl SpecialistResult {
    /// Fill unset confidence and cost from the declared profile. Without a
    /// reported confidence the reply is scored from its content.
    pub fn from_reply(profile: &SpecialistProfile, reply: SpecialistReply, latency: Duration) -> Self {
        let text = reply.text.trim().to_string();
        let confidence = match reply.confidence {
            Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
            Some(c) => c,
            None => quality::content_confidence(&text, profile.base_confidence),
        };
        Self {
            specialist: profile.name.clone(),
            domain: profile.domain,
            length: text.chars().count(),
            text,
            confidence,
            tokens: reply.tokens,
            latency_ms: latency.as_millis() as u64,
            cost: reply.cost.unwrap_or(profile.cost_per_call),
            model: reply.model,
        }
    }
}

/// A weighted result. `order` is the registry declaration index used to
/// break weight ties; escalation tiers sort after every local specialist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    pub result: SpecialistResult,
    pub order: usize,
    pub length_penalty: f64,
    pub repetitive: bool,
    pub weight: f64,
}

/// Ballots collected for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BallotBox {
    ballots: Vec<Ballot>,
}

impl BallotBox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ballot: Ballot) {
        self.ballots.push(ballot);
    }

    pub fn len(&self) -> usize {
        self.ballots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ballots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ballot> {
        self.ballots.iter()
    }

    /// Ballots by weight descending, declaration order ascending on ties.
    pub fn ranked(&self) -> Vec<&Ballot> {
        let mut ranked: Vec<&Ballot> = self.ballots.iter().collect();
        ranked.sort_by(|a, b| b.weight.total_cmp(&a.weight).then(a.order.cmp(&b.order)));
        ranked
    }

    pub fn best(&self) -> Option<&Ballot> {
        self.ranked().into_iter().next()
    }

    pub fn best_weight(&self) -> Option<f64> {
        self.best().map(|b| b.weight)
    }
}

/// Per-domain length penalty curve.
#[derive(Debug, Clone)]
pub struct LengthPenalty {
    short_penalty: f64,
    ramp_floor: f64,
    profiles: BTreeMap<Domain, LengthProfile>,
}

const FALLBACK_PROFILE: LengthProfile = LengthProfile::new(10, 120);

impl LengthPenalty {
    pub fn new(config: &VotingConfig) -> Self {
        Self {
            short_penalty: config.short_penalty,
            ramp_floor: config.ramp_floor,
            profiles: config.length_profiles.clone(),
        }
    }

    pub fn profile(&self, domain: Domain) -> LengthProfile {
        self.profiles
            .get(&domain)
            .or_else(|| self.profiles.get(&Domain::General))
            .copied()
            .unwrap_or(FALLBACK_PROFILE)
    }

    /// Factor in (0, 1], non-decreasing in `text_length`.
    pub fn factor(&self, text_length: usize, domain: Domain) -> f64 {
        let profile = self.profile(domain);
        let min = profile.min_informative_chars;
        let saturation = profile.saturation_chars.max(min + 1);

        if text_length < min {
            return self.short_penalty;
        }
        if text_length >= saturation {
            return 1.0;
        }
        let progress = (text_length - min) as f64 / (saturation - min) as f64;
        self.ramp_floor + (1.0 - self.ramp_floor) * progress
    }
}

impl Default for LengthPenalty {
    fn default() -> Self {
        Self::new(&VotingConfig::default())
    }
}

/// Turns results into ballots and fuses ballots into answers.
#[derive(Debug, Clone)]
pub struct VotingEngine {
    penalty: LengthPenalty,
    repetition_penalty: f64,
}

impl VotingEngine {
    pub fn new(config: &VotingConfig) -> Self {
        Self {
            penalty: LengthPenalty::new(config),
            repetition_penalty: config.repetition_penalty,
        }
    }

    pub fn length_penalty(&self) -> &LengthPenalty {
        &self.penalty
    }

    /// Weight a result. Non-finite confidence is rejected.
    pub fn ballot(&self, result: SpecialistResult, order: usize) -> VotingResult<Ballot> {
        if !result.confidence.is_finite() {
            return Err(VotingError::InvalidConfidence {
                specialist: result.specialist.clone(),
                value: result.confidence,
            });
        }

        let length_penalty = self.penalty.factor(result.length, result.domain);
        let repetitive = quality::is_repetitive(&result.text);
        let mut weight = result.confidence * length_penalty;
        if repetitive {
            weight *= self.repetition_penalty;
        }

        Ok(Ballot {
            result,
            order,
            length_penalty,
            repetitive,
            weight,
        })
    }
}

impl Default for VotingEngine {
    fn default() -> Self {
        Self::new(&VotingConfig::default())
    }
}
