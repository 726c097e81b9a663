//! Resource meter: token/call/time accounting and budget checks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::sync::{Arc, Mutex};

use crate::config::CostRates;
use crate::error::Result;
use crate::llm::{estimate_tokens, GenerationRequest, LLMClient, LLMResponse};

/// Budget status from a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetStatus {
    /// Below 80% of every ceiling
    Ok,
    /// At or above 80% on any ceiling
    Warning,
    /// At or above 100% on any ceiling
    Exceeded,
}

/// Accumulated resource usage. Addition is commutative; accumulation over
/// `track` calls is monotone non-decreasing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub api_calls: u64,
    pub elapsed_seconds: f64,
}

impl ResourceUsage {
    pub fn tokens_total(&self) -> u64 {
        self.tokens_input + self.tokens_output
    }

    /// Estimated cost under the given rates.
    pub fn estimated_cost_usd(&self, rates: &CostRates) -> f64 {
        rates.cost_usd(self.tokens_input, self.tokens_output)
    }
}

impl Add for ResourceUsage {
    type Output = ResourceUsage;

    fn add(self, other: ResourceUsage) -> ResourceUsage {
        ResourceUsage {
            tokens_input: self.tokens_input + other.tokens_input,
            tokens_output: self.tokens_output + other.tokens_output,
            api_calls: self.api_calls + other.api_calls,
            elapsed_seconds: self.elapsed_seconds + other.elapsed_seconds,
        }
    }
}

/// Independent optional ceilings; any subset may be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub max_tokens: Option<u64>,
    pub max_api_calls: Option<u64>,
    pub max_time_seconds: Option<f64>,
    pub max_cost_usd: Option<f64>,
}

impl ResourceBudget {
    pub fn is_empty(&self) -> bool {
        self.max_tokens.is_none()
            && self.max_api_calls.is_none()
            && self.max_time_seconds.is_none()
            && self.max_cost_usd.is_none()
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_max_api_calls(mut self, max_api_calls: u64) -> Self {
        self.max_api_calls = Some(max_api_calls);
        self
    }

    pub fn with_max_time_seconds(mut self, max_time_seconds: f64) -> Self {
        self.max_time_seconds = Some(max_time_seconds);
        self
    }

    pub fn with_max_cost_usd(mut self, max_cost_usd: f64) -> Self {
        self.max_cost_usd = Some(max_cost_usd);
        self
    }
}

/// Result of a budget check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCheck {
    pub status: BudgetStatus,
    pub message: String,
    pub tokens_percent: f64,
    pub calls_percent: f64,
    pub time_percent: f64,
    pub cost_percent: f64,
}

/// Tracks tokens, calls, and elapsed time against an optional budget.
#[derive(Debug)]
pub struct ResourceMeter {
    budget: ResourceBudget,
    rates: CostRates,
    usage: ResourceUsage,
    started_at: Option<DateTime<Utc>>,
    history: Vec<ResourceUsage>,
}

impl ResourceMeter {
    pub fn new(budget: ResourceBudget, rates: CostRates) -> Self {
        Self {
            budget,
            rates,
            usage: ResourceUsage::default(),
            started_at: None,
            history: Vec::new(),
        }
    }

    /// Begin time tracking for a task.
    pub fn start_tracking(&mut self) {
        self.started_at = Some(Utc::now());
    }

    /// Record usage from one or more LLM calls.
    pub fn track(&mut self, tokens_input: u64, tokens_output: u64, api_calls: u64) {
        let increment = ResourceUsage {
            tokens_input,
            tokens_output,
            api_calls,
            elapsed_seconds: 0.0,
        };
        self.usage = self.usage + increment;
        self.history.push(increment);
    }

    /// Current usage with elapsed time refreshed.
    pub fn usage(&self) -> ResourceUsage {
        let mut usage = self.usage;
        if let Some(started) = self.started_at {
            usage.elapsed_seconds = (Utc::now() - started).num_milliseconds() as f64 / 1000.0;
        }
        usage
    }

    pub fn budget(&self) -> &ResourceBudget {
        &self.budget
    }

    pub fn set_budget(&mut self, budget: ResourceBudget) {
        self.budget = budget;
    }

    /// Check usage against the budget ceilings.
    pub fn check_budget(&self) -> BudgetCheck {
        let usage = self.usage();

        if self.budget.is_empty() {
            return BudgetCheck {
                status: BudgetStatus::Ok,
                message: "No budget set".to_string(),
                tokens_percent: 0.0,
                calls_percent: 0.0,
                time_percent: 0.0,
                cost_percent: 0.0,
            };
        }

        let tokens_percent = self
            .budget
            .max_tokens
            .map(|max| usage.tokens_total() as f64 / max as f64 * 100.0)
            .unwrap_or(0.0);
        let calls_percent = self
            .budget
            .max_api_calls
            .map(|max| usage.api_calls as f64 / max as f64 * 100.0)
            .unwrap_or(0.0);
        let time_percent = self
            .budget
            .max_time_seconds
            .map(|max| usage.elapsed_seconds / max * 100.0)
            .unwrap_or(0.0);
        let cost_percent = self
            .budget
            .max_cost_usd
            .map(|max| usage.estimated_cost_usd(&self.rates) / max * 100.0)
            .unwrap_or(0.0);

        let max_percent = tokens_percent
            .max(calls_percent)
            .max(time_percent)
            .max(cost_percent);

        let labelled = [
            ("tokens", tokens_percent),
            ("calls", calls_percent),
            ("time", time_percent),
            ("cost", cost_percent),
        ];

        let (status, message) = if max_percent >= 100.0 {
            let over: Vec<String> = labelled
                .iter()
                .filter(|(_, p)| *p >= 100.0)
                .map(|(name, p)| format!("{} ({:.0}%)", name, p))
                .collect();
            (
                BudgetStatus::Exceeded,
                format!("BUDGET EXCEEDED: {}", over.join(", ")),
            )
        } else if max_percent >= 80.0 {
            let near: Vec<String> = labelled
                .iter()
                .filter(|(_, p)| *p >= 80.0)
                .map(|(name, p)| format!("{} ({:.0}%)", name, p))
                .collect();
            (
                BudgetStatus::Warning,
                format!("WARNING: approaching budget - {}", near.join(", ")),
            )
        } else {
            (
                BudgetStatus::Ok,
                format!("Resources OK ({:.0}% of budget)", max_percent),
            )
        };

        BudgetCheck {
            status,
            message,
            tokens_percent,
            calls_percent,
            time_percent,
            cost_percent,
        }
    }

    /// Estimate resources for the remaining steps by averaging history
    /// per recorded LLM call.
    pub fn estimate_remaining(&self, steps_left: u64) -> ResourceUsage {
        if self.history.is_empty() || steps_left == 0 {
            return ResourceUsage::default();
        }

        let total_calls: u64 = self.history.iter().map(|h| h.api_calls).sum();
        if total_calls == 0 {
            return ResourceUsage::default();
        }

        let total_input: u64 = self.history.iter().map(|h| h.tokens_input).sum();
        let total_output: u64 = self.history.iter().map(|h| h.tokens_output).sum();
        let elapsed = self.usage().elapsed_seconds;

        ResourceUsage {
            tokens_input: total_input / total_calls * steps_left,
            tokens_output: total_output / total_calls * steps_left,
            api_calls: steps_left,
            elapsed_seconds: elapsed / total_calls as f64 * steps_left as f64,
        }
    }

    /// Predicted total usage: current plus estimated remaining.
    pub fn predict_total(&self, steps_left: u64) -> ResourceUsage {
        self.usage() + self.estimate_remaining(steps_left)
    }

    /// Estimated cost of current usage.
    pub fn estimated_cost_usd(&self) -> f64 {
        self.usage().estimated_cost_usd(&self.rates)
    }

    /// Reset counters for a new task.
    pub fn reset(&mut self) {
        self.usage = ResourceUsage::default();
        self.history.clear();
        self.started_at = None;
    }

    /// Textual usage summary.
    pub fn to_summary(&self) -> String {
        let usage = self.usage();
        let check = self.check_budget();

        let mut lines = vec![
            "Resource usage:".to_string(),
            format!(
                "  Tokens: {} ({} in / {} out)",
                usage.tokens_total(),
                usage.tokens_input,
                usage.tokens_output
            ),
            format!("  API calls: {}", usage.api_calls),
            format!("  Time: {:.1}s", usage.elapsed_seconds),
            format!("  Estimated cost: ${:.4}", self.estimated_cost_usd()),
            String::new(),
            format!("Status: {:?}", check.status),
            format!("  {}", check.message),
        ];

        if !self.budget.is_empty() {
            lines.push(String::new());
            lines.push("Budget:".to_string());
            if let Some(max) = self.budget.max_tokens {
                lines.push(format!(
                    "  Tokens: {} / {} ({:.0}%)",
                    usage.tokens_total(),
                    max,
                    check.tokens_percent
                ));
            }
            if let Some(max) = self.budget.max_api_calls {
                lines.push(format!(
                    "  Calls: {} / {} ({:.0}%)",
                    usage.api_calls, max, check.calls_percent
                ));
            }
            if let Some(max) = self.budget.max_time_seconds {
                lines.push(format!(
                    "  Time: {:.1}s / {:.1}s ({:.0}%)",
                    usage.elapsed_seconds, max, check.time_percent
                ));
            }
            if let Some(max) = self.budget.max_cost_usd {
                lines.push(format!(
                    "  Cost: ${:.4} / ${:.4} ({:.0}%)",
                    self.estimated_cost_usd(),
                    max,
                    check.cost_percent
                ));
            }
        }

        lines.join("\n")
    }
}

/// LLM client wrapper that meters every call into a shared meter.
///
/// The orchestrator hands this to the voter and primitives so the meter is
/// incremented on every LLM call without threading it through each layer.
pub struct MeteredClient {
    inner: Arc<dyn LLMClient>,
    meter: Arc<Mutex<ResourceMeter>>,
}

impl MeteredClient {
    pub fn new(inner: Arc<dyn LLMClient>, meter: Arc<Mutex<ResourceMeter>>) -> Self {
        Self { inner, meter }
    }
}

#[async_trait]
impl LLMClient for MeteredClient {
    async fn generate(&self, request: GenerationRequest) -> Result<LLMResponse> {
        let response = self.inner.generate(request).await?;
        self.meter
            .lock()
            .expect("meter poisoned")
            .track(response.tokens_input, response.tokens_output, 1);
        Ok(response)
    }

    async fn compare_semantic(&self, code_a: &str, code_b: &str, context: &str) -> Result<bool> {
        // Delegate so client-specific comparison overrides stay in effect;
        // token counts are estimated because the inner call is opaque here.
        let verdict = self.inner.compare_semantic(code_a, code_b, context).await?;
        let estimated_input = estimate_tokens(code_a) + estimate_tokens(code_b);
        self.meter
            .lock()
            .expect("meter poisoned")
            .track(estimated_input, 1, 1);
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StopReason;

    fn meter_with_budget(budget: ResourceBudget) -> ResourceMeter {
        ResourceMeter::new(budget, CostRates::default())
    }

    #[test]
    fn test_usage_addition_commutative() {
        let a = ResourceUsage {
            tokens_input: 100,
            tokens_output: 50,
            api_calls: 1,
            elapsed_seconds: 1.0,
        };
        let b = ResourceUsage {
            tokens_input: 30,
            tokens_output: 70,
            api_calls: 2,
            elapsed_seconds: 0.5,
        };
        assert_eq!(a + b, b + a);
        assert_eq!((a + b).tokens_total(), 250);
    }

    #[test]
    fn test_tracking_is_monotone() {
        let mut meter = meter_with_budget(ResourceBudget::default());
        let mut last = meter.usage();

        for _ in 0..5 {
            meter.track(100, 50, 1);
            let current = meter.usage();
            assert!(current.tokens_total() >= last.tokens_total());
            assert!(current.api_calls >= last.api_calls);
            last = current;
        }
        assert_eq!(last.api_calls, 5);
        assert_eq!(last.tokens_total(), 750);
    }

    #[test]
    fn test_no_budget_is_always_ok() {
        let mut meter = meter_with_budget(ResourceBudget::default());
        meter.track(1_000_000, 1_000_000, 1000);
        assert_eq!(meter.check_budget().status, BudgetStatus::Ok);
    }

    #[test]
    fn test_budget_warning_at_80_percent() {
        let mut meter = meter_with_budget(ResourceBudget::default().with_max_tokens(1000));
        meter.track(500, 300, 1);
        let check = meter.check_budget();
        assert_eq!(check.status, BudgetStatus::Warning);
        assert!((check.tokens_percent - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_budget_exceeded_at_100_percent() {
        let mut meter = meter_with_budget(ResourceBudget::default().with_max_tokens(100));
        meter.track(150, 0, 1);
        let check = meter.check_budget();
        assert_eq!(check.status, BudgetStatus::Exceeded);
        assert!(check.message.contains("tokens"));
    }

    #[test]
    fn test_any_ceiling_triggers() {
        let mut meter = meter_with_budget(
            ResourceBudget::default()
                .with_max_tokens(1_000_000)
                .with_max_api_calls(2),
        );
        meter.track(10, 10, 1);
        assert_eq!(meter.check_budget().status, BudgetStatus::Ok);
        meter.track(10, 10, 1);
        assert_eq!(meter.check_budget().status, BudgetStatus::Exceeded);
    }

    #[test]
    fn test_estimate_remaining_averages_history() {
        let mut meter = meter_with_budget(ResourceBudget::default());
        meter.track(100, 200, 1);
        meter.track(300, 400, 1);

        let estimate = meter.estimate_remaining(3);
        assert_eq!(estimate.api_calls, 3);
        assert_eq!(estimate.tokens_input, 600); // avg 200 * 3
        assert_eq!(estimate.tokens_output, 900); // avg 300 * 3

        let total = meter.predict_total(3);
        assert_eq!(total.tokens_input, 1000);
    }

    #[test]
    fn test_estimate_remaining_empty_history() {
        let meter = meter_with_budget(ResourceBudget::default());
        assert_eq!(meter.estimate_remaining(5), ResourceUsage::default());
    }

    #[test]
    fn test_reset() {
        let mut meter = meter_with_budget(ResourceBudget::default());
        meter.track(100, 100, 1);
        meter.reset();
        assert_eq!(meter.usage().tokens_total(), 0);
        assert_eq!(meter.estimate_remaining(2), ResourceUsage::default());
    }

    #[tokio::test]
    async fn test_metered_client_tracks_calls() {
        use async_trait::async_trait;

        struct StaticClient;

        #[async_trait]
        impl LLMClient for StaticClient {
            async fn generate(&self, _request: GenerationRequest) -> Result<LLMResponse> {
                Ok(LLMResponse {
                    content: "def f(): pass".to_string(),
                    tokens_input: 120,
                    tokens_output: 60,
                    model: "stub".to_string(),
                    stop_reason: StopReason::EndTurn,
                })
            }
        }

        let meter = Arc::new(Mutex::new(meter_with_budget(ResourceBudget::default())));
        let client = MeteredClient::new(Arc::new(StaticClient), meter.clone());

        client
            .generate(GenerationRequest::new("implement f"))
            .await
            .unwrap();
        client.compare_semantic("a", "b", "").await.unwrap();

        let usage = meter.lock().unwrap().usage();
        // One real generate + one comparison (comparison runs through the
        // inner default, which issues its own un-metered generate, plus the
        // estimated tracking here)
        assert!(usage.api_calls >= 2);
        assert!(usage.tokens_input >= 120);
    }
}
