//! LLM client abstraction.
//!
//! The pipeline consumes LLM access through the [`LLMClient`] trait: a
//! text-generation request plus a binary semantic-equivalence query used by
//! the discriminator. Two transports are provided:
//!
//! - [`AnthropicClient`]: hosted messages API over HTTP
//! - [`CommandClient`]: local command-line invocation
//!
//! ```rust,ignore
//! use quorum_core::llm::{AnthropicClient, ClientConfig, GenerationRequest, LLMClient};
//!
//! let client = AnthropicClient::new(ClientConfig::new("api-key"));
//! let response = client.generate(GenerationRequest::new("Implement a parser")).await?;
//! ```

mod client;
mod command;
mod types;

pub use client::{AnthropicClient, ClientConfig, LLMClient};
pub use command::CommandClient;
pub use types::{estimate_tokens, GenerationRequest, LLMResponse, StopReason};
