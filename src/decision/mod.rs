//! Decision primitives: one thin adapter per pipeline phase.
//!
//! Each primitive builds a prompt from a context snapshot, either runs a
//! voting session or issues a single generation, and parses the textual
//! result into a structured value. Every parser has a documented fallback;
//! when both the primary and fallback parse fail the primitive returns an
//! empty list and the phase yields no progress.

mod decomposer;
mod expander;
mod generator;
mod validator;

pub use decomposer::Decomposer;
pub use expander::Expander;
pub use generator::Generator;
pub use validator::{ValidationReport, Validator};

use crate::types::VoteResult;

/// A parsed decision value plus the voting session that produced it, when
/// voting was used.
#[derive(Debug, Clone)]
pub struct DecisionOutcome<T> {
    pub value: T,
    pub vote: Option<VoteResult>,
}

impl<T> DecisionOutcome<T> {
    pub(crate) fn single(value: T) -> Self {
        Self { value, vote: None }
    }

    pub(crate) fn voted(value: T, vote: VoteResult) -> Self {
        Self {
            value,
            vote: Some(vote),
        }
    }
}
