//! Error types for quorum-core.

use thiserror::Error;

/// Result type alias using quorum-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// LLM API error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A voting session ended with zero valid candidates
    #[error("No valid candidates for step {step_id}")]
    NoValidCandidates { step_id: String },

    /// Attempted state transition not present in the transition table
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Pipeline is already running a task
    #[error("Pipeline is busy: {0}")]
    PipelineBusy(String),

    /// Tool execution error
    #[error("Tool error: {tool} - {message}")]
    Tool { tool: String, message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an LLM error.
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a no-valid-candidates error for a step.
    pub fn no_valid_candidates(step_id: impl Into<String>) -> Self {
        Self::NoValidCandidates {
            step_id: step_id.into(),
        }
    }

    /// Create an invalid-transition error.
    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create a tool error.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
