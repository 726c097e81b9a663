//! # quorum-core
//!
//! An autonomous code-generation agent core that survives stochastic LLM
//! output by voting. A task flows through **Expand -> Decompose ->
//! Generate -> Validate -> Done**; every non-deterministic decision draws
//! candidate responses, rejects garbage with cheap red-flag checks, groups
//! the rest by semantic equivalence (judged by the LLM itself), and accepts
//! the first group to lead the runner-up by a configured margin `k`.
//!
//! ## Core components
//!
//! - **Voter / Discriminator / RedFlagFilter**: the first-to-ahead-by-k
//!   voting scheduler
//! - **Orchestrator**: the finite-state pipeline controller with
//!   pause/resume/cancel at safe points
//! - **DecisionTracker / ResourceMeter / MetaIntrospector**: decision log,
//!   resource accounting, and human-readable introspection
//!
//! ## Example
//!
//! ```rust,ignore
//! use quorum_core::{AnthropicClient, ClientConfig, Language, Orchestrator, VoteConfig};
//! use std::sync::Arc;
//!
//! let client = Arc::new(AnthropicClient::new(ClientConfig::new(api_key)));
//! let mut orchestrator = Orchestrator::new(client, VoteConfig::default().with_k(3));
//!
//! let handle = orchestrator.handle();
//! let outcome = orchestrator.run_task("build a csv parser", Language::Python).await?;
//! if outcome.completed() {
//!     println!("{}", serde_json::to_string_pretty(&outcome.result.unwrap())?);
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod decision;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod tools;
pub mod types;
pub mod vote;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use config::{CostRates, VoteConfig};
pub use decision::{
    DecisionOutcome, Decomposer, Expander, Generator, ValidationReport, Validator,
};
pub use error::{Error, Result};
pub use llm::{
    estimate_tokens, AnthropicClient, ClientConfig, CommandClient, GenerationRequest, LLMClient,
    LLMResponse, StopReason,
};
pub use orchestrator::{
    BudgetCheck, BudgetStatus, DecisionPhase, DecisionRecord, DecisionTracker, FinalResult,
    FunctionSummary, IntentResult, IntentRouter, InterruptKind, InterruptMailbox,
    InterruptRequest, InterruptSource, MetaIntrospector, MeteredClient, Orchestrator,
    OrchestratorHandle, OrchestratorState, OrchestratorStatus, PhaseExplanation, PipelineEvent,
    PipelineMetrics, PipelineOutcome, PipelineState, ResourceBudget, ResourceMeter,
    ResourceUsage, StateTransition, StatusExplanation, UserIntent, VotingDetails, WorkPrediction,
};
pub use tools::{Tool, ToolArgs, ToolRegistry};
pub use types::{
    Candidate, ContextSnapshot, ExecutionResult, Language, Step, StepKind, TaskContext,
    VoteResult,
};
pub use vote::{Discriminator, RedFlagFilter, RedFlagResult, SemanticGroup, Voter};
