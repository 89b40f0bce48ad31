//! OpenAI-compatible chat-completions specialist.
//!
//! Works against any server exposing `POST {base_url}/chat/completions`
//! (llama.cpp, vLLM, Ollama's OpenAI shim, Mistral, OpenAI). When a token
//! price is configured the measured cost is derived from `usage.total_tokens`;
//! otherwise the declared cost per call is charged.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Specialist, SpecialistError, SpecialistProfile, SpecialistReply};
use crate::budget::Cost;

/// Connection details for a chat-completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpEndpoint {
    /// Base URL, e.g. `http://localhost:8080/v1`
    pub url: String,
    pub model: String,
    /// Environment variable holding the bearer token, if any
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub cost_per_1k_tokens_cents: Option<f64>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f64 {
    0.7
}

impl HttpEndpoint {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            api_key_env: None,
            cost_per_1k_tokens_cents: None,
            system_prompt: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.url.trim_end_matches('/'))
    }
}

pub struct HttpSpecialist {
    profile: SpecialistProfile,
    endpoint: HttpEndpoint,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpSpecialist {
    /// Build a client for `endpoint`. The API key is read from the
    /// configured environment variable once, at construction.
    pub fn new(profile: SpecialistProfile, endpoint: HttpEndpoint) -> Result<Self, SpecialistError> {
        let api_key = endpoint
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SpecialistError::RequestFailed(e.to_string()))?;

        Ok(Self {
            profile,
            endpoint,
            api_key,
            client,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &self.endpoint.system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        serde_json::json!({
            "model": self.endpoint.model,
            "messages": messages,
            "max_tokens": self.endpoint.max_tokens,
            "temperature": self.endpoint.temperature,
        })
    }
}

#[async_trait]
impl Specialist for HttpSpecialist {
    fn profile(&self) -> &SpecialistProfile {
        &self.profile
    }

    async fn call(&self, prompt: &str) -> Result<SpecialistReply, SpecialistError> {
        let mut request = self
            .client
            .post(self.endpoint.completions_url())
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SpecialistError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(SpecialistError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpecialistError::RequestFailed(format!(
                "{} returned {}: {}",
                self.endpoint.model, status, body
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SpecialistError::ParseError(e.to_string()))?;

        parse_completion(&body, self.endpoint.cost_per_1k_tokens_cents)
    }
}

/// Extract the answer text, token usage and cost from a completion body.
pub(crate) fn parse_completion(
    body: &serde_json::Value,
    cost_per_1k_tokens_cents: Option<f64>,
) -> Result<SpecialistReply, SpecialistError> {
    let text = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| SpecialistError::ParseError("missing choices[0].message.content".into()))?
        .trim()
        .to_string();

    let tokens = body["usage"]["total_tokens"].as_u64().map(|t| t as u32);
    let cost = match (tokens, cost_per_1k_tokens_cents) {
        (Some(tokens), Some(price)) => Some(Cost::from_cents(tokens as f64 / 1000.0 * price)),
        _ => None,
    };
    debug!(tokens = ?tokens, cost = ?cost, "Parsed chat completion");

    Ok(SpecialistReply {
        text,
        confidence: None,
        cost,
        tokens,
        model: body["model"].as_str().map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_with_usage() {
        let body = serde_json::json!({
            "model": "mistral-small",
            "choices": [{"message": {"role": "assistant", "content": "  Paris.  "}}],
            "usage": {"total_tokens": 1500}
        });
        let reply = parse_completion(&body, Some(0.2)).unwrap();
        assert_eq!(reply.text, "Paris.");
        assert_eq!(reply.tokens, Some(1500));
        assert_eq!(reply.cost, Some(Cost::from_cents(0.3)));
        assert_eq!(reply.model.as_deref(), Some("mistral-small"));
    }

    #[test]
    fn test_parse_completion_without_price_leaves_cost_unset() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "ok"}}],
            "usage": {"total_tokens": 10}
        });
        let reply = parse_completion(&body, None).unwrap();
        assert_eq!(reply.cost, None);
    }

    #[test]
    fn test_parse_completion_missing_content() {
        let body = serde_json::json!({"choices": []});
        let err = parse_completion(&body, None).unwrap_err();
        assert!(matches!(err, SpecialistError::ParseError(_)));
    }

    #[test]
    fn test_completions_url_trims_slash() {
        let endpoint = HttpEndpoint::new("http://localhost:8080/v1/", "qwen");
        assert_eq!(
            endpoint.completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_endpoint_defaults_from_toml() {
        let endpoint: HttpEndpoint =
            toml::from_str("url = \"http://x/v1\"\nmodel = \"m\"").unwrap();
        assert_eq!(endpoint.max_tokens, 500);
        assert!(endpoint.api_key_env.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_failure() {
        let profile = SpecialistProfile::new("remote", crate::registry::Domain::General, 0.6);
        let specialist =
            HttpSpecialist::new(profile, HttpEndpoint::new("http://127.0.0.1:9/v1", "m")).unwrap();
        let err = specialist.call("hello").await.unwrap_err();
        assert!(matches!(err, SpecialistError::RequestFailed(_)));
    }
}
