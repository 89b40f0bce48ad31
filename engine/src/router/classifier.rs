//! Lexical intent classifier.
//!
//! Each [`IntentRule`] is a case-insensitive regex tagged with a domain and
//! a weight. A domain's score for a prompt is the weight of its strongest
//! matching rule plus a small bonus per additional match, capped at 1.0.
//! A specialist's routing score is its domain score times its base
//! confidence; the highest score is primary, ties going to declaration order.
//!
//! ```text
//! "What is 15 * 23?"
//!   math      0.95  (operator between numbers)
//!   knowledge 0.65  ("what is")
//!   ──► primary = first math specialist
//!   ──► fill    = general, then the next specialists in order
//! ```

use std::collections::BTreeMap;

use regex::Regex;
use tracing::{debug, info};

use super::{ConversationContext, DecisionMode, RouteReason, RoutedSpecialist, RoutingDecision};
use crate::config::IntentRuleConfig;
use crate::registry::{Domain, SpecialistRegistry};

/// Bonus per additional matching rule within a domain.
const EXTRA_MATCH_BONUS: f64 = 0.05;

/// Weight applied to signals carried over from the previous turn.
const CARRY_OVER_FACTOR: f64 = 0.5;

const BUILTIN_RULES: &[(Domain, f64, &str)] = &[
    // math
    (Domain::Math, 0.95, r"\d+\s*[-+*/^×÷]\s*\d+"),
    (Domain::Math, 0.9, r"\b(sqrt|sin|cos|tan|log|exp|factorial)\b"),
    (Domain::Math, 0.85, r"\b(solve|equation|calculate|compute)\b"),
    (Domain::Math, 0.85, r"\b(derivative|integral|limit|sum)\b"),
    (Domain::Math, 0.8, r"\b(matrix|vector|determinant)\b"),
    // code
    (Domain::Code, 0.85, r"\bwrite\b.*\b(code|function|script|program)\b"),
    (Domain::Code, 0.8, r"\b(python|javascript|java|cpp|rust|golang|typescript)\b"),
    (Domain::Code, 0.75, r"\bdef |\bclass |\bimport |\bfunction\b|\balgorithm\b"),
    (Domain::Code, 0.8, r"\bdebug\b|\bfix\b.*\bcode\b|\bcode review\b"),
    (Domain::Code, 0.75, r"\b(run|execute)\b.*\bcode\b"),
    // logic
    (Domain::Logic, 0.75, r"\bif\b.*\bthen\b|\blogic(al)?\b|\breasoning\b"),
    (Domain::Logic, 0.75, r"\b(proof|prove|theorem|premise|conclusion)\b"),
    (Domain::Logic, 0.75, r"\b(syllogism|deduction|induction)\b"),
    (Domain::Logic, 0.3, r"\b(true|false)\b|\bnot\s+"),
    // knowledge
    (Domain::Knowledge, 0.65, r"\b(what|who|where|when|how)\s+(is|was|are|were|did)\b"),
    (Domain::Knowledge, 0.65, r"\bexplain\b|\bdescribe\b|\btell\b.*\babout\b|\binformation\b.*\babout\b"),
    (Domain::Knowledge, 0.6, r"\b(definition|meaning|concept)\b"),
    (Domain::Knowledge, 0.6, r"\b(history|facts|trivia)\b"),
];

/// A weighted lexical signal for one domain.
#[derive(Debug, Clone)]
pub struct IntentRule {
    pub domain: Domain,
    pub weight: f64,
    pattern: Regex,
}

impl IntentRule {
    pub fn new(domain: Domain, weight: f64, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            domain,
            weight: weight.clamp(0.0, 1.0),
            pattern: Regex::new(&format!("(?i){pattern}"))?,
        })
    }

    pub fn matches(&self, prompt: &str) -> bool {
        self.pattern.is_match(prompt)
    }
}

pub struct Classifier {
    rules: Vec<IntentRule>,
    comparison_count: usize,
}

impl Classifier {
    /// Classifier with the built-in rules.
    pub fn builtin(comparison_count: usize) -> Result<Self, regex::Error> {
        let rules = BUILTIN_RULES
            .iter()
            .map(|(domain, weight, pattern)| IntentRule::new(*domain, *weight, pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            comparison_count,
        })
    }

    /// Built-in rules plus configured extras.
    pub fn with_extra_rules(
        comparison_count: usize,
        extra: &[IntentRuleConfig],
    ) -> Result<Self, regex::Error> {
        let mut classifier = Self::builtin(comparison_count)?;
        for rule in extra {
            classifier
                .rules
                .push(IntentRule::new(rule.domain, rule.weight, &rule.pattern)?);
        }
        Ok(classifier)
    }

    pub fn comparison_count(&self) -> usize {
        self.comparison_count
    }

    /// Intent score per domain. Domains with no matching rule are absent.
    pub fn domain_scores(&self, prompt: &str) -> BTreeMap<Domain, f64> {
        let mut matched: BTreeMap<Domain, (f64, usize)> = BTreeMap::new();
        for rule in self.rules.iter().filter(|r| r.matches(prompt)) {
            let entry = matched.entry(rule.domain).or_insert((0.0, 0));
            entry.0 = entry.0.max(rule.weight);
            entry.1 += 1;
        }
        matched
            .into_iter()
            .map(|(domain, (best, count))| {
                let bonus = EXTRA_MATCH_BONUS * count.saturating_sub(1) as f64;
                (domain, (best + bonus).min(1.0))
            })
            .collect()
    }

    pub fn classify(
        &self,
        prompt: &str,
        registry: &SpecialistRegistry,
        history: Option<&ConversationContext>,
    ) -> RoutingDecision {
        let mut scores = self.domain_scores(prompt);
        if scores.is_empty() {
            if let Some(previous) = history.and_then(ConversationContext::last_prompt) {
                scores = self
                    .domain_scores(previous)
                    .into_iter()
                    .map(|(domain, score)| (domain, score * CARRY_OVER_FACTOR))
                    .collect();
                if !scores.is_empty() {
                    debug!(?scores, "Carried intent over from previous turn");
                }
            }
        }

        let mut best: Option<(usize, f64)> = None;
        for (index, specialist) in registry.iter().enumerate() {
            let profile = specialist.profile();
            let score = scores.get(&profile.domain).copied().unwrap_or(0.0) * profile.base_confidence;
            if score > best.map_or(0.0, |(_, s)| s) {
                best = Some((index, score));
            }
        }

        let (primary, reason) = match best {
            Some((index, score)) => (index, RouteReason::Primary { score }),
            None => {
                info!(
                    prompt_chars = prompt.chars().count(),
                    fallback = registry.general().name(),
                    "Classification ambiguous, routing to general specialist"
                );
                (registry.general_index(), RouteReason::Fallback)
            }
        };

        let mut entries = vec![routed(registry, primary, reason)];
        for index in self.comparison_fill(registry, primary) {
            entries.push(routed(registry, index, RouteReason::ComparisonFill));
        }

        let decision = RoutingDecision {
            entries,
            mode: DecisionMode::Compare,
            domain_scores: scores,
        };
        debug!(route = ?decision.names(), "Classified prompt");
        decision
    }

    /// Up to `comparison_count` non-primary specialists. The general
    /// specialist comes first when it is not the primary, so any
    /// `top_k >= 2` and any downgraded dispatch reach it; the rest follow
    /// in declaration order.
    fn comparison_fill(&self, registry: &SpecialistRegistry, primary: usize) -> Vec<usize> {
        let general = registry.general_index();
        let lead = (primary != general).then_some(general);
        lead.into_iter()
            .chain((0..registry.len()).filter(|&i| i != primary && i != general))
            .take(self.comparison_count)
            .collect()
    }
}

fn routed(registry: &SpecialistRegistry, index: usize, reason: RouteReason) -> RoutedSpecialist {
    let (index, specialist) = match registry.by_index(index) {
        Some(specialist) => (index, specialist),
        None => (registry.general_index(), registry.general()),
    };
    let profile = specialist.profile();
    RoutedSpecialist {
        name: profile.name.clone(),
        index,
        domain: profile.domain,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::Cost;
    use crate::registry::{
        Specialist, SpecialistError, SpecialistProfile, SpecialistReply, SharedSpecialist,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Fixed(SpecialistProfile);

    #[async_trait]
    impl Specialist for Fixed {
        fn profile(&self) -> &SpecialistProfile {
            &self.0
        }

        async fn call(&self, _prompt: &str) -> Result<SpecialistReply, SpecialistError> {
            Ok(SpecialistReply::text("ok"))
        }
    }

    fn specialist(name: &str, domain: Domain, confidence: f64) -> SharedSpecialist {
        Arc::new(Fixed(
            SpecialistProfile::new(name, domain, confidence).with_cost(Cost::from_cents(1.0)),
        ))
    }

    fn registry() -> SpecialistRegistry {
        SpecialistRegistry::builder()
            .register(specialist("math", Domain::Math, 0.95))
            .register(specialist("code", Domain::Code, 0.85))
            .register(specialist("logic", Domain::Logic, 0.75))
            .register(specialist("knowledge", Domain::Knowledge, 0.65))
            .register(specialist("general", Domain::General, 0.6))
            .build()
            .unwrap()
    }

    fn classifier() -> Classifier {
        Classifier::builtin(3).unwrap()
    }

    #[test]
    fn test_domain_scores() {
        let scores = classifier().domain_scores("What is 15 * 23?");
        assert_eq!(scores[&Domain::Math], 0.95);
        assert_eq!(scores[&Domain::Knowledge], 0.65);
        assert!(!scores.contains_key(&Domain::Code));
    }

    #[test]
    fn test_arithmetic_routes_to_math_with_comparisons() {
        let decision = classifier().classify("What is 15 * 23?", &registry(), None);
        assert_eq!(decision.primary().name, "math");
        assert!(matches!(decision.primary().reason, RouteReason::Primary { .. }));
        assert_eq!(decision.names(), vec!["math", "general", "code", "logic"]);
        assert_eq!(decision.mode, DecisionMode::Compare);
    }

    #[test]
    fn test_general_survives_any_top_k_of_two() {
        let c = classifier();
        let r = registry();
        for prompt in [
            "What is 15 * 23?",
            "Write a Python function to reverse a list",
            "Explain the history of Rome",
            "Prove that if a then b",
        ] {
            let decision = c.classify(prompt, &r, None);
            let names: Vec<&str> = decision.selected(2).iter().map(|e| e.name.as_str()).collect();
            assert_eq!(names.len(), 2);
            assert_eq!(names[1], "general", "prompt {prompt:?} selected {names:?}");
        }
    }

    #[test]
    fn test_code_prompt() {
        let decision =
            classifier().classify("Write a Python function to reverse a list", &registry(), None);
        assert_eq!(decision.primary().name, "code");
        assert!(decision.names().contains(&"general"));
        assert_eq!(decision.len(), 4);
    }

    #[test]
    fn test_knowledge_prompt() {
        let decision = classifier().classify("Explain the history of Rome", &registry(), None);
        assert_eq!(decision.primary().name, "knowledge");
    }

    #[test]
    fn test_no_signal_falls_back_to_general() {
        let decision = classifier().classify("hello there", &registry(), None);
        assert_eq!(decision.primary().name, "general");
        assert_eq!(decision.primary().reason, RouteReason::Fallback);
        assert_eq!(decision.names(), vec!["general", "math", "code", "logic"]);
    }

    #[test]
    fn test_follow_up_carries_intent() {
        let mut history = ConversationContext::new();
        history.push("Calculate the derivative of x^2");
        let decision = classifier().classify("and why?", &registry(), Some(&history));
        assert_eq!(decision.primary().name, "math");
    }

    #[test]
    fn test_ties_break_on_declaration_order() {
        let registry = SpecialistRegistry::builder()
            .register(specialist("math_a", Domain::Math, 0.9))
            .register(specialist("math_b", Domain::Math, 0.9))
            .register(specialist("general", Domain::General, 0.6))
            .build()
            .unwrap();
        let decision = classifier().classify("2 + 2", &registry, None);
        assert_eq!(decision.primary().name, "math_a");
    }

    #[test]
    fn test_fill_respects_small_registries() {
        let registry = SpecialistRegistry::builder()
            .register(specialist("math", Domain::Math, 0.9))
            .register(specialist("general", Domain::General, 0.6))
            .build()
            .unwrap();
        let decision = classifier().classify("2 + 2", &registry, None);
        assert_eq!(decision.names(), vec!["math", "general"]);

        let zero_fill = Classifier::builtin(0).unwrap();
        assert_eq!(zero_fill.classify("2 + 2", &registry, None).len(), 1);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let c = classifier();
        let r = registry();
        let first = c.classify("Prove that if a then b", &r, None);
        for _ in 0..10 {
            assert_eq!(c.classify("Prove that if a then b", &r, None), first);
        }
    }

    #[test]
    fn test_extra_rules() {
        let extra = vec![IntentRuleConfig {
            domain: Domain::Code,
            weight: 1.0,
            pattern: r"\bregex\b".into(),
        }];
        let c = Classifier::with_extra_rules(3, &extra).unwrap();
        let decision = c.classify("help with a regex", &registry(), None);
        assert_eq!(decision.primary().name, "code");
    }

    #[test]
    fn test_candidates_override() {
        let r = registry();
        let names = vec!["nope".to_string(), "logic".into(), "logic".into(), "math".into()];
        let decision = RoutingDecision::from_candidates(&names, &r).unwrap();
        assert_eq!(decision.names(), vec!["logic", "math"]);
        assert_eq!(decision.primary().reason, RouteReason::Requested);

        assert!(RoutingDecision::from_candidates(&["nope".to_string()], &r).is_none());
        let single = RoutingDecision::from_candidates(&["math".to_string()], &r).unwrap();
        assert_eq!(single.mode, DecisionMode::Single);
        assert_eq!(single.selected(4).len(), 1);
    }
}
