//! Rule-based answer fusion.
//!
//! The highest-weighted ballot is the primary answer. When the runner-up
//! comes from a different domain and says something the primary does not,
//! its text is appended as a complement. Fusion never blends arbitrary
//! answers together: at most one complement is added.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::voting::{Ballot, BallotBox, VotingEngine, VotingError, VotingResult};
use crate::registry::Domain;

const COMPLEMENT_JOINER: &str = " Additionally, ";

/// How one ballot figured into the fused answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub specialist: String,
    pub domain: Domain,
    pub confidence: f64,
    pub length_penalty: f64,
    pub weight: f64,
    /// Whether this ballot's text appears in the fused answer
    pub included: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedAnswer {
    pub text: String,
    /// Weight of the primary ballot
    pub confidence: f64,
    pub primary: String,
    pub model: Option<String>,
    /// Every ballot, ranked
    pub contributors: Vec<Contribution>,
    /// True when more than one ballot was considered
    pub consensus_fusion: bool,
}

fn contribution(ballot: &Ballot, included: bool) -> Contribution {
    Contribution {
        specialist: ballot.result.specialist.clone(),
        domain: ballot.result.domain,
        confidence: ballot.result.confidence,
        length_penalty: ballot.length_penalty,
        weight: ballot.weight,
        included,
    }
}

impl VotingEngine {
    /// Whether `candidate` adds information the primary lacks.
    fn complements(&self, candidate: &Ballot, primary: &Ballot) -> bool {
        if candidate.result.domain == primary.result.domain || candidate.repetitive {
            return false;
        }
        let min = self
            .length_penalty()
            .profile(candidate.result.domain)
            .min_informative_chars;
        if candidate.result.length < min {
            return false;
        }
        let needle = candidate.result.text.to_lowercase();
        !primary.result.text.to_lowercase().contains(needle.trim())
    }

    pub fn fuse(&self, ballots: &BallotBox) -> VotingResult<FusedAnswer> {
        let ranked = ballots.ranked();
        let primary = *ranked.first().ok_or(VotingError::Empty)?;

        let mut text = primary.result.text.clone();
        let mut contributors = vec![contribution(primary, true)];

        if let Some(runner_up) = ranked.get(1) {
            let include = self.complements(runner_up, primary);
            if include {
                text.push_str(COMPLEMENT_JOINER);
                text.push_str(&runner_up.result.text);
            }
            contributors.push(contribution(runner_up, include));
        }
        contributors.extend(ranked.iter().skip(2).map(|b| contribution(b, false)));

        let fused = FusedAnswer {
            text,
            confidence: primary.weight.clamp(0.0, 1.0),
            primary: primary.result.specialist.clone(),
            model: primary.result.model.clone(),
            contributors,
            consensus_fusion: ranked.len() > 1,
        };
        debug!(
            primary = %fused.primary,
            confidence = fused.confidence,
            ballots = ranked.len(),
            complemented = fused.contributors.get(1).is_some_and(|c| c.included),
            "Fused answer"
        );
        Ok(fused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::voting::SpecialistResult;
    use crate::registry::{SpecialistProfile, SpecialistReply};
    use std::time::Duration;

    fn ballot(engine: &VotingEngine, name: &str, domain: Domain, text: &str, c: f64, order: usize) -> Ballot {
        let profile = SpecialistProfile::new(name, domain, c);
        let result = SpecialistResult::from_reply(&profile, SpecialistReply::text(text), Duration::ZERO);
        engine.ballot(result, order).unwrap()
    }

    #[test]
    fn test_empty_box_is_error() {
        let engine = VotingEngine::default();
        assert_eq!(engine.fuse(&BallotBox::new()), Err(VotingError::Empty));
    }

    #[test]
    fn test_single_ballot_passes_through() {
        let engine = VotingEngine::default();
        let mut ballots = BallotBox::new();
        let only = ballot(&engine, "math", Domain::Math, "The product of 15 and 23 is 345.", 0.95, 0);
        let expected_weight = only.weight;
        ballots.push(only);

        let fused = engine.fuse(&ballots).unwrap();
        assert_eq!(fused.text, "The product of 15 and 23 is 345.");
        assert!(!fused.consensus_fusion);
        assert_eq!(fused.confidence, expected_weight);
        assert_eq!(fused.contributors.len(), 1);
    }

    #[test]
    fn test_bare_numeral_loses_to_explanation_and_is_not_appended() {
        let engine = VotingEngine::default();
        let mut ballots = BallotBox::new();
        ballots.push(ballot(&engine, "math", Domain::Math, "345", 0.95, 0));
        ballots.push(ballot(&engine, "general", Domain::General, "15 times 23 equals 345.", 0.6, 4));

        let fused = engine.fuse(&ballots).unwrap();
        assert_eq!(fused.primary, "general");
        assert_eq!(fused.text, "15 times 23 equals 345.");
        assert!(fused.consensus_fusion);
        assert_eq!(fused.contributors[1].specialist, "math");
        assert!(!fused.contributors[1].included);
    }

    #[test]
    fn test_cross_domain_complement_is_appended() {
        let engine = VotingEngine::default();
        let mut ballots = BallotBox::new();
        ballots.push(ballot(
            &engine,
            "knowledge",
            Domain::Knowledge,
            "Rome was founded in 753 BC according to tradition, on the Palatine Hill.",
            0.8,
            3,
        ));
        ballots.push(ballot(
            &engine,
            "general",
            Domain::General,
            "Its founders were said to be Romulus and Remus.",
            0.6,
            4,
        ));

        let fused = engine.fuse(&ballots).unwrap();
        assert_eq!(fused.primary, "knowledge");
        assert!(fused.text.contains(" Additionally, Its founders"));
        assert!(fused.contributors[1].included);
    }

    #[test]
    fn test_same_domain_runner_up_not_appended() {
        let engine = VotingEngine::default();
        let mut ballots = BallotBox::new();
        ballots.push(ballot(&engine, "g1", Domain::General, "A long enough general answer here.", 0.9, 0));
        ballots.push(ballot(&engine, "g2", Domain::General, "Another general answer entirely.", 0.5, 1));

        let fused = engine.fuse(&ballots).unwrap();
        assert_eq!(fused.text, "A long enough general answer here.");
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let engine = VotingEngine::default();
        let mut ballots = BallotBox::new();
        ballots.push(ballot(&engine, "a", Domain::Code, "same weight answer text", 0.7, 1));
        ballots.push(ballot(&engine, "b", Domain::Code, "same weight answer text", 0.7, 0));
        let first = engine.fuse(&ballots).unwrap();
        assert_eq!(first.primary, "b");
        for _ in 0..5 {
            assert_eq!(engine.fuse(&ballots).unwrap(), first);
        }
    }
}
