//! Expand: task description -> atomic requirements.
//!
//! Expansion is bottom-up discovery of requirements that were not explicit
//! in the task, as opposed to decomposition which splits something large
//! into parts.

use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::VoteConfig;
use crate::error::Result;
use crate::llm::{GenerationRequest, LLMClient};
use crate::types::{ContextSnapshot, Language, Step, StepKind};
use crate::vote::Voter;

use super::DecisionOutcome;

const EXPAND_SYSTEM: &str = "You are an expert requirements analyst.\n\
Given a task description, expand it into atomic requirements.\n\n\
IMPORTANT:\n\
- Each requirement must be ATOMIC (one single thing)\n\
- Each requirement must be TESTABLE\n\
- Each requirement must be INDEPENDENT (can be implemented alone)\n\
- Do NOT include implementation details\n\
- Focus on WHAT not HOW\n\n\
Output format: JSON array of strings, one requirement per line.\n\
Example: [\"User can login with email\", \"Password has minimum 8 chars\", ...]";

static JSON_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[\s\S]*\]").expect("invalid regex"));
static BULLET_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*•]\s*").expect("invalid regex"));
static NUMBER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s*").expect("invalid regex"));
static QUOTED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^"(.+)",?$"#).expect("invalid regex"));

fn expand_prompt(task: &str, context: &str) -> String {
    format!(
        "Task: {}\n\n{}\n\nList ALL atomic requirements needed to complete this task.\n\
         Be thorough - missing requirements cause bugs later.\n\nOutput as JSON array:",
        task, context
    )
}

/// Expands a task into atomic requirements, optionally through voting.
pub struct Expander {
    client: Arc<dyn LLMClient>,
    config: VoteConfig,
    cancel: CancelToken,
}

impl Expander {
    pub fn new(client: Arc<dyn LLMClient>, config: VoteConfig) -> Self {
        Self {
            client,
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Expand a task into requirements.
    ///
    /// With `use_vote` the generation is wrapped in a voting session; a
    /// single sample is taken otherwise. De-duplication happens when the
    /// requirements are inserted into the context.
    pub async fn expand(
        &self,
        task: &str,
        snapshot: Option<&ContextSnapshot>,
        use_vote: bool,
    ) -> Result<DecisionOutcome<Vec<String>>> {
        let context_text = snapshot.map(|s| s.to_prompt_context()).unwrap_or_default();
        let prompt = expand_prompt(task, &context_text);

        if use_vote {
            let step = Step::new(StepKind::Expand, format!("Expand requirements for: {}", task));
            let request_template = self.request(&prompt);
            let client = self.client.clone();

            let mut voter =
                Voter::new(self.client.clone(), self.config.clone()).with_cancel(self.cancel.clone());
            let result = voter
                .vote(&step, &prompt, Language::Python, move |_step, _ctx| {
                    let client = client.clone();
                    let request = request_template.clone();
                    async move { client.generate(request).await }
                })
                .await?;

            let requirements = parse_requirements(&result.winner.content);
            Ok(DecisionOutcome::voted(requirements, result))
        } else {
            let response = self.client.generate(self.request(&prompt)).await?;
            Ok(DecisionOutcome::single(parse_requirements(&response.content)))
        }
    }

    /// Iterative expansion: refine requirements over several rounds, feeding
    /// prior findings back as context, until a round adds nothing new.
    pub async fn expand_iterative(&self, task: &str, max_iterations: u32) -> Result<Vec<String>> {
        let mut requirements: Vec<String> = Vec::new();

        for _ in 0..max_iterations {
            let mut context_text = String::new();
            if !requirements.is_empty() {
                context_text.push_str("Requirements found so far:\n");
                for (i, r) in requirements.iter().enumerate() {
                    context_text.push_str(&format!("{}. {}\n", i + 1, r));
                }
                context_text.push_str("\nFind additional requirements NOT in this list.");
            }

            let prompt = expand_prompt(task, &context_text);
            let response = self.client.generate(self.request(&prompt)).await?;
            let new_requirements = parse_requirements(&response.content);

            let before = requirements.len();
            for requirement in new_requirements {
                if !requirements.contains(&requirement) {
                    requirements.push(requirement);
                }
            }

            if requirements.len() == before {
                break;
            }
        }

        Ok(requirements)
    }

    fn request(&self, prompt: &str) -> GenerationRequest {
        GenerationRequest::new(prompt)
            .with_system(EXPAND_SYSTEM)
            .with_temperature(self.config.temperature)
            .with_max_tokens(1000)
            .with_model(self.config.model.clone())
    }
}

/// Parse an LLM response into a requirements list.
///
/// Primary: extract a JSON array. Fallback: line-by-line stripping of
/// bullets, numbering, and quotes. Distinguishes unparseable output from a
/// legitimately empty result in the logs.
pub(crate) fn parse_requirements(text: &str) -> Vec<String> {
    let text = text.trim();

    if let Some(found) = JSON_ARRAY.find(text) {
        if let Ok(serde_json::Value::Array(items)) =
            serde_json::from_str::<serde_json::Value>(found.as_str())
        {
            let requirements: Vec<String> = items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if requirements.is_empty() {
                debug!("expand response parsed to an empty requirement list");
            }
            return requirements;
        }
    }

    // Fallback: one requirement per line
    let mut requirements = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let line = BULLET_PREFIX.replace(line, "");
        let line = NUMBER_PREFIX.replace(&line, "");
        let line = QUOTED_LINE
            .captures(&line)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| line.to_string());

        if line.len() > 5 && !line.starts_with('[') && !line.starts_with(']') {
            requirements.push(line);
        }
    }

    if requirements.is_empty() {
        warn!("expand response was unparseable as JSON or lines");
    }
    requirements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMResponse, StopReason};
    use async_trait::async_trait;

    struct FixedClient {
        content: String,
    }

    #[async_trait]
    impl LLMClient for FixedClient {
        async fn generate(&self, _request: GenerationRequest) -> Result<LLMResponse> {
            Ok(LLMResponse {
                content: self.content.clone(),
                tokens_input: 50,
                tokens_output: 50,
                model: "stub".to_string(),
                stop_reason: StopReason::EndTurn,
            })
        }

        async fn compare_semantic(&self, _a: &str, _b: &str, _c: &str) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_parse_json_array() {
        let parsed = parse_requirements(
            r#"Here is the list:
["User can login with email", "Password has minimum 8 chars"]"#,
        );
        assert_eq!(
            parsed,
            vec![
                "User can login with email".to_string(),
                "Password has minimum 8 chars".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_bulleted_fallback() {
        let parsed = parse_requirements(
            "- User can login with email\n* Password has minimum 8 chars\n1. Token expires in 24h",
        );
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[2], "Token expires in 24h");
    }

    #[test]
    fn test_parse_quoted_lines_fallback() {
        let parsed = parse_requirements("\"Login works\",\n\"Logout works\"");
        assert_eq!(parsed, vec!["Login works", "Logout works"]);
    }

    #[test]
    fn test_parse_empty_json_array_is_empty_not_fallback() {
        assert!(parse_requirements("[]").is_empty());
    }

    #[test]
    fn test_parse_garbage_yields_empty() {
        assert!(parse_requirements("??").is_empty());
    }

    #[tokio::test]
    async fn test_expand_single_shot() {
        let expander = Expander::new(
            Arc::new(FixedClient {
                content: r#"["Validate email format", "Hash the password"]"#.to_string(),
            }),
            VoteConfig::default(),
        );

        let outcome = expander.expand("auth system", None, false).await.unwrap();
        assert_eq!(outcome.value.len(), 2);
        assert!(outcome.vote.is_none());
    }

    #[tokio::test]
    async fn test_expand_with_vote_attaches_session() {
        let expander = Expander::new(
            Arc::new(FixedClient {
                content: r#"["Validate email format"]"#.to_string(),
            }),
            VoteConfig::default().with_k(1).with_max_samples(5),
        );

        let outcome = expander.expand("auth system", None, true).await.unwrap();
        assert_eq!(outcome.value, vec!["Validate email format"]);
        let vote = outcome.vote.expect("voting session attached");
        assert!(vote.complete);
        assert!(vote.total_samples >= 1);
    }

    #[tokio::test]
    async fn test_expand_iterative_stops_when_no_new() {
        let expander = Expander::new(
            Arc::new(FixedClient {
                content: r#"["Same requirement each round"]"#.to_string(),
            }),
            VoteConfig::default(),
        );

        let requirements = expander.expand_iterative("task", 5).await.unwrap();
        // Round 2 adds nothing, loop stops
        assert_eq!(requirements, vec!["Same requirement each round"]);
    }
}
