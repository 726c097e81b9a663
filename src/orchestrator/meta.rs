//! Meta-introspection: human-readable views over the pipeline.
//!
//! Pure formatting over borrowed state, tracker, and meter views. The
//! introspector holds no state of its own.

use crate::config::CostRates;

use super::engine::OrchestratorStatus;
use super::resources::ResourceMeter;
use super::state::PipelineState;
use super::tracker::{DecisionPhase, DecisionTracker};

/// Status rendered at two levels of detail plus actionable suggestions.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusExplanation {
    pub short: String,
    pub detailed: String,
    pub suggestions: Vec<String>,
}

/// Explanation of one pipeline phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseExplanation {
    pub phase: &'static str,
    pub purpose: &'static str,
    pub current_progress: String,
    pub what_happens_next: &'static str,
}

/// Prediction of remaining work.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkPrediction {
    pub steps_remaining: u64,
    pub estimated_time_seconds: f64,
    pub estimated_tokens: u64,
    pub estimated_cost_usd: f64,
    pub confidence: &'static str,
}

/// Stateless formatter over orchestrator, tracker, and meter views.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetaIntrospector;

impl MetaIntrospector {
    pub fn new() -> Self {
        Self
    }

    /// Explain the current status.
    pub fn explain_status(
        &self,
        status: &OrchestratorStatus,
        error_message: Option<&str>,
    ) -> StatusExplanation {
        StatusExplanation {
            short: self.short_status(status, error_message),
            detailed: self.detailed_status(status),
            suggestions: self.suggestions(status.state),
        }
    }

    fn short_status(&self, status: &OrchestratorStatus, error_message: Option<&str>) -> String {
        match status.state {
            PipelineState::Idle => "Waiting for a task".to_string(),
            PipelineState::Paused => {
                format!("Paused at {:.0}%", status.progress_percent)
            }
            PipelineState::Completed => {
                format!("Completed in {:.1}s", status.elapsed_seconds)
            }
            PipelineState::Error => {
                format!("Error: {}", error_message.unwrap_or("unknown"))
            }
            _ => format!("{} - {}", status.state_name, status.phase_detail),
        }
    }

    fn detailed_status(&self, status: &OrchestratorStatus) -> String {
        let mut lines = vec![
            format!("State: {}", status.state_name),
            format!(
                "Task: {}",
                if status.task.is_empty() {
                    "(none)"
                } else {
                    &status.task
                }
            ),
            format!("Progress: {:.0}%", status.progress_percent),
            String::new(),
            "Partial results:".to_string(),
            format!("  - Requirements: {}", status.requirements_count),
            format!("  - Functions: {}", status.functions_count),
            format!("  - Generated code: {}", status.code_count),
            String::new(),
            format!("Elapsed: {:.1}s", status.elapsed_seconds),
        ];

        if status.is_paused {
            lines.push(String::new());
            lines.push("Pipeline PAUSED. Resume to continue.".to_string());
        }

        lines.join("\n")
    }

    fn suggestions(&self, state: PipelineState) -> Vec<String> {
        let items: &[&str] = match state {
            PipelineState::Idle => &["Start a task to begin", "Ask for help to see capabilities"],
            PipelineState::Paused => &[
                "Resume to continue",
                "Cancel to abandon the task",
                "Check status for progress details",
            ],
            PipelineState::Completed => &[
                "Inspect the decision history",
                "Check resource usage",
                "Start a new task",
            ],
            PipelineState::Error => &["Retry the task", "Ask for an explanation of the error"],
            _ => &["Ask for an explanation for more detail"],
        };
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Explain one pipeline phase by name.
    pub fn explain_phase(&self, phase: &str, status: &OrchestratorStatus) -> PhaseExplanation {
        match phase.to_lowercase().as_str() {
            "expand" => PhaseExplanation {
                phase: "EXPAND",
                purpose: "Analyze the task and extract individual atomic requirements",
                current_progress: if status.requirements_count > 0 {
                    format!("{} requirements produced", status.requirements_count)
                } else {
                    "Producing requirements...".to_string()
                },
                what_happens_next: "Requirements are organized into functions (DECOMPOSE)",
            },
            "decompose" => PhaseExplanation {
                phase: "DECOMPOSE",
                purpose: "Organize requirements into functions with clear responsibilities",
                current_progress: if status.functions_count > 0 {
                    format!("{} functions planned", status.functions_count)
                } else {
                    "Planning functions...".to_string()
                },
                what_happens_next: "Each function is implemented (GENERATE)",
            },
            "generate" => PhaseExplanation {
                phase: "GENERATE",
                purpose: "Implement the code for each planned function",
                current_progress: format!(
                    "{}/{} functions implemented",
                    status.code_count, status.functions_count
                ),
                what_happens_next: "Generated code is checked (VALIDATE)",
            },
            "validate" => PhaseExplanation {
                phase: "VALIDATE",
                purpose: "Check syntax and correctness of the generated code",
                current_progress: format!("{} implementations to check", status.code_count),
                what_happens_next: "Pipeline completes",
            },
            _ => PhaseExplanation {
                phase: "UNKNOWN",
                purpose: "Unknown phase",
                current_progress: "n/a".to_string(),
                what_happens_next: "n/a",
            },
        }
    }

    /// Explain one decision by id.
    pub fn explain_decision(&self, tracker: &DecisionTracker, decision_id: &str) -> String {
        match tracker.get_by_id(decision_id) {
            Some(decision) => decision.to_explanation(),
            None => format!("Decision {} not found.", decision_id),
        }
    }

    /// Summarize all decisions, including the average voting margin.
    pub fn summarize_decisions(&self, tracker: &DecisionTracker) -> String {
        tracker.summarize()
    }

    /// Explain all decisions of one phase.
    pub fn explain_decision_phase(&self, tracker: &DecisionTracker, phase: DecisionPhase) -> String {
        tracker.explain_phase(phase)
    }

    /// Predict remaining work from metered history.
    pub fn predict(
        &self,
        meter: &ResourceMeter,
        rates: &CostRates,
        steps_remaining: u64,
    ) -> WorkPrediction {
        let estimate = meter.estimate_remaining(steps_remaining);

        // More recorded calls means a steadier average
        let calls = meter.usage().api_calls;
        let confidence = if calls >= 10 {
            "high"
        } else if calls >= 3 {
            "medium"
        } else {
            "low"
        };

        WorkPrediction {
            steps_remaining,
            estimated_time_seconds: estimate.elapsed_seconds,
            estimated_tokens: estimate.tokens_total(),
            estimated_cost_usd: estimate.estimated_cost_usd(rates),
            confidence,
        }
    }

    /// Resource usage summary.
    pub fn explain_resources(&self, meter: &ResourceMeter) -> String {
        meter.to_summary()
    }
}
