//! Engine configuration
//!
//! Loaded from a TOML file, then overridden by `COUNCIL_*` environment
//! variables, then validated. Every section has defaults, so a file only
//! needs to declare its specialists.
//!
//! ```toml
//! [routing]
//! default_top_k = 4
//!
//! [budget]
//! daily_cap_cents = 500.0
//!
//! [[specialists]]
//! name = "math_specialist"
//! domain = "math"
//! kind = "arithmetic"
//! base_confidence = 0.95
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::budget::Cost;
use crate::registry::{
    ArithmeticSpecialist, Domain, HttpEndpoint, HttpSpecialist, RegistryError, SharedSpecialist,
    SpecialistProfile,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid intent pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to build specialist {name}: {reason}")]
    Specialist { name: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Specialists dispatched per request when the caller gives no top_k
    pub default_top_k: usize,
    /// Non-primary specialists appended to every routing decision
    pub comparison_count: usize,
    /// Registry declaration order; also the routing tie-break order
    pub specialists_order: Vec<String>,
    /// Extra lexical rules appended to the built-in ones
    pub extra_rules: Vec<IntentRuleConfig>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_top_k: 4,
            comparison_count: 3,
            specialists_order: Vec::new(),
            extra_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRuleConfig {
    pub domain: Domain,
    pub weight: f64,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub call_timeout_ms: u64,
    /// Aggregate deadline for one dispatch, across all specialists
    pub request_timeout_ms: u64,
    pub max_concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            request_timeout_ms: 12_000,
            max_concurrency: 4,
        }
    }
}

impl DispatchConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily_cap_cents: f64,
    pub request_cap_cents: f64,
    pub latency_budget_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_cap_cents: 500.0,
            request_cap_cents: 25.0,
            latency_budget_ms: 12_000,
        }
    }
}

impl BudgetConfig {
    pub fn daily_cap(&self) -> Cost {
        Cost::from_cents(self.daily_cap_cents)
    }

    pub fn request_cap(&self) -> Cost {
        Cost::from_cents(self.request_cap_cents)
    }

    pub fn latency_budget(&self) -> Duration {
        Duration::from_millis(self.latency_budget_ms)
    }
}

/// Answer-length window for one domain. Below `min_informative_chars`
/// an answer is penalized flat; at `saturation_chars` it takes no penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthProfile {
    pub min_informative_chars: usize,
    pub saturation_chars: usize,
}

impl LengthProfile {
    pub const fn new(min_informative_chars: usize, saturation_chars: usize) -> Self {
        Self {
            min_informative_chars,
            saturation_chars,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    /// Factor applied to answers shorter than the domain minimum
    pub short_penalty: f64,
    /// Factor at the domain minimum; ramps linearly to 1.0 at saturation
    pub ramp_floor: f64,
    /// Extra factor for degenerate, looping output
    pub repetition_penalty: f64,
    pub length_profiles: BTreeMap<Domain, LengthProfile>,
}

impl Default for VotingConfig {
    fn default() -> Self {
        let length_profiles = [
            (Domain::Math, LengthProfile::new(8, 40)),
            (Domain::Code, LengthProfile::new(20, 200)),
            (Domain::Logic, LengthProfile::new(12, 80)),
            (Domain::Knowledge, LengthProfile::new(20, 160)),
            (Domain::General, LengthProfile::new(10, 120)),
            (Domain::Cloud, LengthProfile::new(10, 160)),
        ]
        .into_iter()
        .collect();

        Self {
            short_penalty: 0.4,
            ramp_floor: 0.7,
            repetition_penalty: 0.1,
            length_profiles,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub enabled: bool,
    /// Best ballot weight below which a cloud tier is consulted
    pub confidence_floor: f64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_floor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistKind {
    Arithmetic,
    Http,
}

/// One `[[specialists]]` or `[[cloud]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistDefinition {
    pub name: String,
    pub domain: Domain,
    pub kind: SpecialistKind,
    pub base_confidence: f64,
    #[serde(default)]
    pub cost_cents: f64,
    #[serde(default = "default_expected_latency_ms")]
    pub expected_latency_ms: u64,
    #[serde(default)]
    pub endpoint: Option<HttpEndpoint>,
}

fn default_expected_latency_ms() -> u64 {
    2_000
}

impl SpecialistDefinition {
    pub fn profile(&self) -> SpecialistProfile {
        SpecialistProfile::new(self.name.clone(), self.domain, self.base_confidence)
            .with_cost(Cost::from_cents(self.cost_cents))
            .with_expected_latency_ms(self.expected_latency_ms)
    }

    pub fn build(&self) -> Result<SharedSpecialist, ConfigError> {
        match self.kind {
            SpecialistKind::Arithmetic => Ok(Arc::new(ArithmeticSpecialist::new(self.profile()))),
            SpecialistKind::Http => {
                let endpoint = self.endpoint.clone().ok_or_else(|| ConfigError::Specialist {
                    name: self.name.clone(),
                    reason: "http specialist needs an [endpoint] table".into(),
                })?;
                let specialist = HttpSpecialist::new(self.profile(), endpoint).map_err(|e| {
                    ConfigError::Specialist {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Arc::new(specialist))
            }
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub routing: RoutingConfig,
    pub dispatch: DispatchConfig,
    pub budget: BudgetConfig,
    pub voting: VotingConfig,
    pub escalation: EscalationConfig,
    pub specialists: Vec<SpecialistDefinition>,
    /// Escalation tiers, tried in order
    pub cloud: Vec<SpecialistDefinition>,
}

impl EngineConfig {
    /// Read, apply env overrides, validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides()?;
        config.validate()?;
        info!(
            path = %path.display(),
            specialists = config.specialists.len(),
            cloud_tiers = config.cloud.len(),
            "Loaded engine config"
        );
        Ok(config)
    }

    /// Parse without env overrides or validation.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from any variable source.
    pub fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = parse_override::<f64>(&lookup, "COUNCIL_DAILY_BUDGET_CENTS")? {
            self.budget.daily_cap_cents = v;
        }
        if let Some(v) = parse_override::<f64>(&lookup, "COUNCIL_REQUEST_BUDGET_CENTS")? {
            self.budget.request_cap_cents = v;
        }
        if let Some(v) = parse_override::<usize>(&lookup, "COUNCIL_TOP_K")? {
            self.routing.default_top_k = v;
        }
        if let Some(v) = parse_override::<f64>(&lookup, "COUNCIL_ESCALATION_FLOOR")? {
            self.escalation.confidence_floor = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.specialists.is_empty() {
            return invalid("at least one [[specialists]] entry is required".into());
        }
        if !self.specialists.iter().any(|s| s.domain == Domain::General) {
            return invalid("one specialist must have domain = \"general\"".into());
        }
        for def in self.specialists.iter().chain(&self.cloud) {
            if !(0.0..=1.0).contains(&def.base_confidence) {
                return invalid(format!("{}: base_confidence must be in [0, 1]", def.name));
            }
            if !def.cost_cents.is_finite() || def.cost_cents < 0.0 {
                return invalid(format!("{}: cost_cents must be >= 0", def.name));
            }
            if def.kind == SpecialistKind::Http && def.endpoint.is_none() {
                return invalid(format!("{}: http specialist needs an endpoint", def.name));
            }
        }
        if let Some(def) = self.specialists.iter().find(|s| s.domain == Domain::Cloud) {
            return invalid(format!("{}: cloud-domain entries belong under [[cloud]]", def.name));
        }
        if self.routing.default_top_k == 0 {
            return invalid("routing.default_top_k must be >= 1".into());
        }
        if self.dispatch.call_timeout_ms == 0 || self.dispatch.request_timeout_ms == 0 {
            return invalid("dispatch timeouts must be > 0".into());
        }
        if self.dispatch.max_concurrency == 0 {
            return invalid("dispatch.max_concurrency must be >= 1".into());
        }
        if !(self.budget.daily_cap_cents >= 0.0 && self.budget.request_cap_cents >= 0.0) {
            return invalid("budget caps must be >= 0".into());
        }
        if !(0.0..=1.0).contains(&self.escalation.confidence_floor) {
            return invalid("escalation.confidence_floor must be in [0, 1]".into());
        }

        let v = &self.voting;
        if !(v.short_penalty > 0.0 && v.short_penalty <= v.ramp_floor && v.ramp_floor <= 1.0) {
            return invalid("voting requires 0 < short_penalty <= ramp_floor <= 1".into());
        }
        if !(0.0..=1.0).contains(&v.repetition_penalty) {
            return invalid("voting.repetition_penalty must be in [0, 1]".into());
        }
        for (domain, profile) in &v.length_profiles {
            if profile.min_informative_chars >= profile.saturation_chars {
                return invalid(format!(
                    "voting.length_profiles.{domain}: min_informative_chars must be < saturation_chars"
                ));
            }
        }
        for rule in &self.routing.extra_rules {
            regex::Regex::new(&rule.pattern)?;
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [[specialists]]
        name = "math_specialist"
        domain = "math"
        kind = "arithmetic"
        base_confidence = 0.95
        cost_cents = 0.1

        [[specialists]]
        name = "general"
        domain = "general"
        kind = "http"
        base_confidence = 0.6
        cost_cents = 1.0

        [specialists.endpoint]
        url = "http://localhost:8080/v1"
        model = "qwen"
    "#;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.routing.default_top_k, 4);
        assert_eq!(config.routing.comparison_count, 3);
        assert_eq!(config.dispatch.call_timeout(), Duration::from_secs(5));
        assert_eq!(config.budget.daily_cap(), Cost::from_cents(500.0));
        assert_eq!(config.voting.length_profiles.len(), Domain::ALL.len());
        assert!(config.escalation.enabled);
    }

    #[test]
    fn test_parse_minimal() {
        let config = EngineConfig::from_toml_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.specialists.len(), 2);
        assert_eq!(config.specialists[0].kind, SpecialistKind::Arithmetic);
        assert_eq!(
            config.specialists[1].endpoint.as_ref().unwrap().model,
            "qwen"
        );
        assert_eq!(config.specialists[0].expected_latency_ms, 2_000);
    }

    #[test]
    fn test_overrides() {
        let mut config = EngineConfig::from_toml_str(MINIMAL).unwrap();
        let vars: HashMap<&str, &str> = [
            ("COUNCIL_DAILY_BUDGET_CENTS", "42.5"),
            ("COUNCIL_TOP_K", "2"),
        ]
        .into_iter()
        .collect();
        config
            .apply_overrides_from(|v| vars.get(v).map(|s| s.to_string()))
            .unwrap();
        assert_eq!(config.budget.daily_cap_cents, 42.5);
        assert_eq!(config.routing.default_top_k, 2);
        assert_eq!(config.budget.request_cap_cents, 25.0);
    }

    #[test]
    fn test_bad_override_is_reported() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides_from(|v| (v == "COUNCIL_TOP_K").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref var, .. } if var == "COUNCIL_TOP_K"));
    }

    #[test]
    fn test_validate_rejects_missing_general() {
        let mut config = EngineConfig::from_toml_str(MINIMAL).unwrap();
        config.specialists.retain(|s| s.domain != Domain::General);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_penalties() {
        let mut config = EngineConfig::from_toml_str(MINIMAL).unwrap();
        config.voting.short_penalty = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.specialists[1].name, "general");
    }

    #[test]
    fn test_from_file_missing() {
        let err = EngineConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_build_specialists() {
        let config = EngineConfig::from_toml_str(MINIMAL).unwrap();
        let math = config.specialists[0].build().unwrap();
        assert_eq!(math.profile().cost_per_call, Cost::from_cents(0.1));
        let general = config.specialists[1].build().unwrap();
        assert_eq!(general.profile().domain, Domain::General);
    }
}
