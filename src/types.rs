//! Shared pipeline types.
//!
//! The fundamental data model used across the crate:
//! - [`Step`]: an atomic unit of intended work
//! - [`Candidate`]: one sampled LLM response for a decision
//! - [`VoteResult`]: the outcome of a voting session
//! - [`TaskContext`] / [`ContextSnapshot`]: mutable state and its immutable
//!   defensive copy handed to decision primitives

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Generate a short id (8 hex chars of a v4 UUID).
pub(crate) fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Target language for generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    TypeScript,
}

impl Language {
    /// Parse from a CLI-style tag.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "python" | "py" => Some(Self::Python),
            "typescript" | "ts" => Some(Self::TypeScript),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Python => write!(f, "python"),
            Self::TypeScript => write!(f, "typescript"),
        }
    }
}

/// Kind of step in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    // Decision steps (may use voting)
    Expand,
    Decompose,
    Generate,
    Validate,
    Decide,

    // Deterministic tool steps
    Read,
    Search,
    Test,
    Apply,

    // Control
    Done,
}

impl StepKind {
    /// Whether this step dispatches to a deterministic tool.
    pub fn is_tool(&self) -> bool {
        matches!(self, Self::Read | Self::Search | Self::Test | Self::Apply)
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Expand => "expand",
            Self::Decompose => "decompose",
            Self::Generate => "generate",
            Self::Validate => "validate",
            Self::Decide => "decide",
            Self::Read => "read",
            Self::Search => "search",
            Self::Test => "test",
            Self::Apply => "apply",
            Self::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// An atomic unit of intended work. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Stable identifier, unique per session
    pub id: String,
    /// Step kind
    pub kind: StepKind,
    /// Free-text description
    pub description: String,
    /// Function signature, when the step describes a function to implement
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    /// Extra context (dependencies, imports)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context: String,
    /// Tool action for deterministic steps, e.g. `read:src/main.py`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl Step {
    /// Create a step with a generated id.
    pub fn new(kind: StepKind, description: impl Into<String>) -> Self {
        Self {
            id: short_id(),
            kind,
            description: description.into(),
            signature: String::new(),
            context: String::new(),
            action: None,
        }
    }

    /// Set an explicit id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the function signature.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Set the context string.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Set the tool action.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// One sampled LLM response for a decision.
///
/// Mutated exactly once by the red-flag filter and once by the
/// discriminator, then read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Unique id
    pub id: String,
    /// The purported code/answer
    pub content: String,
    /// Estimated output tokens
    pub tokens_output: u64,
    /// Set to false by the red-flag filter on rejection
    pub is_valid: bool,
    /// Rejection reason, when red-flagged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
    /// Semantic group assigned by the discriminator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl Candidate {
    /// Wrap response content as a candidate.
    pub fn new(content: impl Into<String>, tokens_output: u64) -> Self {
        Self {
            id: short_id(),
            content: content.into(),
            tokens_output,
            is_valid: true,
            rejection: None,
            group_id: None,
        }
    }
}

/// The outcome of one voting session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResult {
    /// Winning candidate (k-margin winner, or plurality on exhaustion)
    pub winner: Candidate,
    /// Members per group id
    pub groups: HashMap<String, Vec<Candidate>>,
    /// Vote count per group id
    pub votes_per_group: HashMap<String, u32>,
    /// Samples consumed, counting red-flagged candidates
    pub total_samples: u32,
    /// Leader votes minus runner-up votes (runner-up is 0 with one group)
    pub winning_margin: u32,
    /// False only when the session was cancelled before terminating
    pub complete: bool,
}

impl VoteResult {
    /// Vote count of the winning group.
    pub fn winner_votes(&self) -> u32 {
        self.winner
            .group_id
            .as_ref()
            .and_then(|g| self.votes_per_group.get(g))
            .copied()
            .unwrap_or(0)
    }
}

/// Result of a deterministic tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured payload (file contents, match lists, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ExecutionResult {
    /// Successful result with output text.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            data: None,
        }
    }

    /// Failed result with an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            data: None,
        }
    }

    /// Attach structured data.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Immutable snapshot of the task context, taken when a decision starts.
///
/// Decision primitives and the voter only ever see snapshots; they must not
/// retain them past the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub task: String,
    pub language: Language,
    pub requirements: Vec<String>,
    pub functions: Vec<Step>,
    /// step id -> generated code, in generation order
    pub generated_code: Vec<(String, String)>,
    pub execution_results: Vec<(Step, ExecutionResult)>,
    pub timestamp: DateTime<Utc>,
}

impl ContextSnapshot {
    /// Render the snapshot as prompt context.
    pub fn to_prompt_context(&self) -> String {
        let mut lines = vec![format!("# Task: {}", self.task), String::new()];

        if !self.requirements.is_empty() {
            lines.push("## Requirements:".to_string());
            for (i, req) in self.requirements.iter().enumerate() {
                lines.push(format!("{}. {}", i + 1, req));
            }
            lines.push(String::new());
        }

        if !self.functions.is_empty() {
            lines.push("## Functions to implement:".to_string());
            for func in &self.functions {
                lines.push(format!("- {}: {}", func.signature, func.description));
            }
            lines.push(String::new());
        }

        if !self.generated_code.is_empty() {
            lines.push("## Generated code so far:".to_string());
            for (step_id, code) in &self.generated_code {
                lines.push(format!("### {}", step_id));
                lines.push(format!("```{}\n{}\n```", self.language, code));
            }
            lines.push(String::new());
        }

        if !self.execution_results.is_empty() {
            lines.push("## Execution results:".to_string());
            let tail = self.execution_results.len().saturating_sub(5);
            for (step, result) in &self.execution_results[tail..] {
                let status = if result.success { "OK" } else { "FAIL" };
                lines.push(format!("- [{}] {}", status, step.description));
                if !result.output.is_empty() {
                    let mut preview: String = result.output.chars().take(200).collect();
                    if result.output.chars().count() > 200 {
                        preview.push_str("...");
                    }
                    lines.push(format!("  Output: {}", preview));
                }
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

/// Mutable task state, exclusively owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task: String,
    pub language: Language,
    requirements: Vec<String>,
    functions: Vec<Step>,
    generated_code: Vec<(String, String)>,
    execution_results: Vec<(Step, ExecutionResult)>,
    is_complete: bool,
}

impl TaskContext {
    /// Create a fresh context for a task.
    pub fn new(task: impl Into<String>, language: Language) -> Self {
        Self {
            task: task.into(),
            language,
            requirements: Vec::new(),
            functions: Vec::new(),
            generated_code: Vec::new(),
            execution_results: Vec::new(),
            is_complete: false,
        }
    }

    /// Take an immutable defensive copy for a decision.
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            task: self.task.clone(),
            language: self.language,
            requirements: self.requirements.clone(),
            functions: self.functions.clone(),
            generated_code: self.generated_code.clone(),
            execution_results: self.execution_results.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Append a requirement, deduplicating on insert.
    pub fn add_requirement(&mut self, requirement: impl Into<String>) {
        let requirement = requirement.into();
        if !self.requirements.contains(&requirement) {
            self.requirements.push(requirement);
        }
    }

    /// Append a planned function.
    pub fn add_function(&mut self, step: Step) {
        self.functions.push(step);
    }

    /// Record generated code for a step.
    pub fn add_code(&mut self, step_id: impl Into<String>, code: impl Into<String>) {
        self.generated_code.push((step_id.into(), code.into()));
    }

    /// Record a tool execution result.
    pub fn add_result(&mut self, step: Step, result: ExecutionResult) {
        self.execution_results.push((step, result));
    }

    /// Mark the task complete.
    pub fn mark_complete(&mut self) {
        self.is_complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn requirements(&self) -> &[String] {
        &self.requirements
    }

    pub fn functions(&self) -> &[Step] {
        &self.functions
    }

    pub fn generated_code(&self) -> &[(String, String)] {
        &self.generated_code
    }

    pub fn execution_results(&self) -> &[(Step, ExecutionResult)] {
        &self.execution_results
    }

    /// Code for a specific step, if generated.
    pub fn code_for(&self, step_id: &str) -> Option<&str> {
        self.generated_code
            .iter()
            .find(|(id, _)| id == step_id)
            .map(|(_, code)| code.as_str())
    }
}
