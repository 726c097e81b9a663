//! LLM client trait and the hosted-API implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

use super::types::{GenerationRequest, LLMResponse, StopReason};

const COMPARE_SYSTEM: &str = "You are a code analysis expert.\n\
Determine if two code snippets are SEMANTICALLY EQUIVALENT.\n\
They are equivalent if they produce the same output for all valid inputs.\n\
Minor differences in formatting, variable names, or implementation details\n\
do not matter - only the behavior matters.\n\
Answer ONLY \"YES\" or \"NO\".";

/// Build the semantic-equivalence prompt for two snippets.
///
/// The exact wording is a tuning knob; callers must not depend on it.
pub(crate) fn compare_prompt(code_a: &str, code_b: &str, context: &str) -> String {
    format!(
        "Context: {}\n\nCode A:\n```\n{}\n```\n\nCode B:\n```\n{}\n```\n\n\
         Are these two codes semantically equivalent? (YES/NO)",
        context, code_a, code_b
    )
}

/// LLM client capability consumed by the voter and decision primitives.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Issue a text-generation request.
    async fn generate(&self, request: GenerationRequest) -> Result<LLMResponse>;

    /// Binary semantic-equivalence query: do the two snippets behave
    /// identically for all valid inputs?
    ///
    /// The provided implementation issues a YES/NO generation at
    /// temperature 0; clients may override with a cheaper scheme.
    async fn compare_semantic(&self, code_a: &str, code_b: &str, context: &str) -> Result<bool> {
        let request = GenerationRequest::new(compare_prompt(code_a, code_b, context))
            .with_system(COMPARE_SYSTEM)
            .with_temperature(0.0)
            .with_max_tokens(10);

        let response = self.generate(request).await?;
        Ok(response.content.trim().to_uppercase().starts_with("YES"))
    }
}

/// Configuration for LLM clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Default model
    pub default_model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Default max tokens when the request does not set one
    pub default_max_tokens: u32,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: "claude-3-5-haiku-20241022".to_string(),
            timeout_secs: 120,
            default_max_tokens: 1024,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Anthropic messages-API client.
pub struct AnthropicClient {
    config: ClientConfig,
    http: Client,
}

impl AnthropicClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: ClientConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<AnthropicContent>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[async_trait]
impl LLMClient for AnthropicClient {
    async fn generate(&self, request: GenerationRequest) -> Result<LLMResponse> {
        let model = request
            .model
            .unwrap_or_else(|| self.config.default_model.clone());

        let api_request = AnthropicRequest {
            model,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.prompt,
            }],
            max_tokens: request.max_tokens.unwrap_or(self.config.default_max_tokens),
            system: request.system,
            temperature: request.temperature,
        };

        let url = format!("{}/v1/messages", self.base_url());

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(self.config.timeout_secs * 1000)
                } else {
                    Error::llm(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::llm(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<AnthropicError>(&body) {
                return Err(Error::llm(format!(
                    "API error ({}): {}",
                    error.error.error_type, error.error.message
                )));
            }
            return Err(Error::llm(format!("API error ({}): {}", status, body)));
        }

        let api_response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| Error::llm(format!("Failed to parse response: {}", e)))?;

        let content = api_response
            .content
            .iter()
            .filter_map(|c| c.text.as_ref())
            .cloned()
            .collect::<Vec<_>>()
            .join("");

        let stop_reason = match api_response.stop_reason.as_deref() {
            Some("max_tokens") => StopReason::MaxTokens,
            Some("stop_sequence") => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        };

        Ok(LLMResponse {
            content,
            tokens_input: api_response.usage.input_tokens,
            tokens_output: api_response.usage.output_tokens,
            model: api_response.model,
            stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClient {
        answer: String,
    }

    #[async_trait]
    impl LLMClient for FixedClient {
        async fn generate(&self, _request: GenerationRequest) -> Result<LLMResponse> {
            Ok(LLMResponse {
                content: self.answer.clone(),
                tokens_input: 10,
                tokens_output: 1,
                model: "stub".to_string(),
                stop_reason: StopReason::EndTurn,
            })
        }
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("test-key")
            .with_base_url("https://custom.api.com")
            .with_default_model("claude-3-5-haiku")
            .with_timeout(60);

        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.base_url, Some("https://custom.api.com".to_string()));
        assert_eq!(config.default_model, "claude-3-5-haiku");
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_compare_prompt_fences_both_snippets() {
        let prompt = compare_prompt("def a(): pass", "def b(): pass", "task ctx");
        assert!(prompt.contains("task ctx"));
        assert!(prompt.contains("def a(): pass"));
        assert!(prompt.contains("def b(): pass"));
        assert!(prompt.contains("YES/NO"));
    }

    #[tokio::test]
    async fn test_compare_semantic_parses_yes() {
        let client = FixedClient {
            answer: "YES".to_string(),
        };
        assert!(client.compare_semantic("a", "b", "").await.unwrap());

        let client = FixedClient {
            answer: "NO".to_string(),
        };
        assert!(!client.compare_semantic("a", "b", "").await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_semantic_tolerates_whitespace() {
        let client = FixedClient {
            answer: "  yes\n".to_string(),
        };
        assert!(client.compare_semantic("a", "b", "").await.unwrap());
    }
}
