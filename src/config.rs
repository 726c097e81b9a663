//! Configuration for the voting scheduler and pipeline.

use serde::{Deserialize, Serialize};

/// Per-token pricing used to present cost estimates.
///
/// These are presentation rates only; nothing in the crate charges anything.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostRates {
    /// USD per 1K input tokens
    pub input_per_1k: f64,
    /// USD per 1K output tokens
    pub output_per_1k: f64,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            input_per_1k: 0.003,
            output_per_1k: 0.015,
        }
    }
}

impl CostRates {
    /// Estimated cost in USD for the given token counts.
    pub fn cost_usd(&self, tokens_input: u64, tokens_output: u64) -> f64 {
        let input = (tokens_input as f64 / 1000.0) * self.input_per_1k;
        let output = (tokens_output as f64 / 1000.0) * self.output_per_1k;
        input + output
    }
}

/// Configuration bundle for voting and pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteConfig {
    /// Votes of advantage required to win (first-to-ahead-by-k)
    pub k: u32,
    /// Maximum candidates sampled per voting session
    pub max_samples: u32,
    /// Red-flag ceiling on estimated response tokens
    pub max_tokens_response: u32,
    /// LLM sampling temperature
    pub temperature: f64,
    /// Model identifier passed through to the client
    pub model: String,
    /// Batch size for parallel vote generation
    pub batch_size: u32,

    /// Outer timeout for a voting session
    pub vote_timeout_seconds: u64,
    /// Timeout for deterministic tool execution
    pub execution_timeout_seconds: u64,
    /// Outer timeout for a single LLM request
    pub request_timeout_seconds: u64,

    /// Bounded retries for the Validating -> Generating loop
    pub max_validate_retries: u32,

    // Red-flag toggles
    pub enable_syntax_check: bool,
    pub enable_length_check: bool,
    pub enable_format_check: bool,

    /// Pricing used for cost estimates
    pub cost_rates: CostRates,
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self {
            k: 3,
            max_samples: 20,
            max_tokens_response: 500,
            temperature: 0.1,
            model: "claude-3-5-haiku-20241022".to_string(),
            batch_size: 3,
            vote_timeout_seconds: 60,
            execution_timeout_seconds: 30,
            request_timeout_seconds: 120,
            max_validate_retries: 1,
            enable_syntax_check: true,
            enable_length_check: true,
            enable_format_check: true,
            cost_rates: CostRates::default(),
        }
    }
}

impl VoteConfig {
    /// Set the voting margin.
    pub fn with_k(mut self, k: u32) -> Self {
        self.k = k;
        self
    }

    /// Set the per-vote sample ceiling.
    pub fn with_max_samples(mut self, max_samples: u32) -> Self {
        self.max_samples = max_samples;
        self
    }

    /// Set the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the parallel generation batch size.
    ///
    /// The effective batch never exceeds `max_samples`.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Batch size clamped to the sample ceiling.
    pub fn effective_batch_size(&self) -> u32 {
        self.batch_size.clamp(1, self.max_samples.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = VoteConfig::default();
        assert_eq!(config.k, 3);
        assert_eq!(config.max_samples, 20);
        assert_eq!(config.max_tokens_response, 500);
        assert_eq!(config.max_validate_retries, 1);
        assert!(config.enable_syntax_check);
        assert!(config.enable_length_check);
        assert!(config.enable_format_check);
    }

    #[test]
    fn test_builder() {
        let config = VoteConfig::default()
            .with_k(2)
            .with_max_samples(10)
            .with_batch_size(0);

        assert_eq!(config.k, 2);
        assert_eq!(config.max_samples, 10);
        // Zero is clamped up
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn test_effective_batch_size_bounded_by_samples() {
        let config = VoteConfig::default()
            .with_max_samples(4)
            .with_batch_size(16);
        assert_eq!(config.effective_batch_size(), 4);
    }

    #[test]
    fn test_cost_rates() {
        let rates = CostRates::default();
        // 1000 in + 1000 out = 0.003 + 0.015
        let cost = rates.cost_usd(1000, 1000);
        assert!((cost - 0.018).abs() < 1e-9);
    }
}
