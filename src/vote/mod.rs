//! The voting scheduler: red-flag filtering, semantic grouping, and
//! first-to-ahead-by-k consensus.
//!
//! For every non-deterministic decision the [`Voter`] draws candidate
//! responses, drops obvious garbage through the [`RedFlagFilter`], clusters
//! the rest with the [`Discriminator`] (using the LLM itself as the
//! equivalence judge), and declares a winner once one cluster leads the
//! runner-up by the configured margin `k`.

mod discriminator;
mod proptest;
mod red_flag;
mod voter;

pub use discriminator::{Discriminator, SemanticGroup};
pub use red_flag::{RedFlagFilter, RedFlagResult};
pub use voter::Voter;
