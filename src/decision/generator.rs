//! Generate: function step -> implementation code.

use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;

use crate::cancel::CancelToken;
use crate::config::VoteConfig;
use crate::error::Result;
use crate::llm::{GenerationRequest, LLMClient};
use crate::types::{ContextSnapshot, Language, Step};
use crate::vote::Voter;

use super::DecisionOutcome;

static FENCE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```\w*\n?").expect("invalid regex"));
static FENCE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n?```$").expect("invalid regex"));

fn generate_system(language: Language) -> String {
    format!(
        "You are an expert {} developer.\n\
         Generate ONLY the code requested - no explanations, no markdown.\n\n\
         Requirements:\n\
         - Clean, readable code\n\
         - Follow {} best practices\n\
         - Include type hints\n\
         - Handle edge cases\n\
         - Keep it simple - don't over-engineer\n\n\
         Output the function/class directly, no ``` markers.",
        language, language
    )
}

fn generate_prompt(step: &Step, context: &str) -> String {
    format!(
        "Function to implement:\n{}\n\nDescription:\n{}\n\nContext:\n{}\n\nImplement this function:",
        step.signature, step.description, context
    )
}

/// Implements code for a step, optionally through voting.
pub struct Generator {
    client: Arc<dyn LLMClient>,
    config: VoteConfig,
    cancel: CancelToken,
}

impl Generator {
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

    /// Generate code for a step with signature and description.
    pub async fn generate(
        &self,
        step: &Step,
        snapshot: Option<&ContextSnapshot>,
        language: Language,
        use_vote: bool,
    ) -> Result<DecisionOutcome<String>> {
        let mut context_text = snapshot.map(|s| s.to_prompt_context()).unwrap_or_default();
        if !step.context.is_empty() {
            context_text.push_str("\n\n");
            context_text.push_str(&step.context);
        }

        let prompt = generate_prompt(step, &context_text);
        let system = generate_system(language);

        if use_vote {
            let request_template = self.request(&prompt, &system);
            let client = self.client.clone();

            let mut voter =
                Voter::new(self.client.clone(), self.config.clone()).with_cancel(self.cancel.clone());
            let result = voter
                .vote(step, &prompt, language, move |_step, _ctx| {
                    let client = client.clone();
                    let request = request_template.clone();
                    async move { client.generate(request).await }
                })
                .await?;

            let code = clean_code(&result.winner.content);
            Ok(DecisionOutcome::voted(code, result))
        } else {
            let response = self.client.generate(self.request(&prompt, &system)).await?;
            Ok(DecisionOutcome::single(clean_code(&response.content)))
        }
    }

    fn request(&self, prompt: &str, system: &str) -> GenerationRequest {
        GenerationRequest::new(prompt)
            .with_system(system)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens_response)
            .with_model(self.config.model.clone())
    }
}

/// Strip fenced markers, then trim leading prose by scanning until the
/// first line that looks like code (definition, import, or comment).
pub(crate) fn clean_code(code: &str) -> String {
    let code = code.trim();
    let code = FENCE_OPEN.replace(code, "");
    let code = FENCE_CLOSE.replace(&code, "");

    let mut code_started = false;
    let mut clean_lines = Vec::new();

    for line in code.lines() {
        if !code_started {
            let trimmed = line.trim_start();
            if trimmed.starts_with("def ")
                || trimmed.starts_with("async def ")
                || trimmed.starts_with("class ")
                || trimmed.starts_with("import ")
                || trimmed.starts_with("from ")
                || trimmed.starts_with("function ")
                || trimmed.starts_with("export ")
                || trimmed.starts_with("const ")
                || trimmed.starts_with('#')
                || trimmed.starts_with("//")
            {
                code_started = true;
                clean_lines.push(line);
            }
        } else {
            clean_lines.push(line);
        }
    }

    if clean_lines.is_empty() {
        code.to_string()
    } else {
        clean_lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMResponse, StopReason};
    use crate::types::StepKind;
    use async_trait::async_trait;

    struct FixedClient {
        content: String,
    }

    #[async_trait]
    impl LLMClient for FixedClient {
        async fn generate(&self, _request: GenerationRequest) -> Result<LLMResponse> {
            Ok(LLMResponse {
                content: self.content.clone(),
                tokens_input: 40,
                tokens_output: 30,
                model: "stub".to_string(),
                stop_reason: StopReason::EndTurn,
            })
        }

        async fn compare_semantic(&self, _a: &str, _b: &str, _c: &str) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_clean_strips_fences() {
        let cleaned = clean_code("```python\ndef f(x):\n    return x\n```");
        assert_eq!(cleaned, "def f(x):\n    return x");
    }

    #[test]
    fn test_clean_trims_leading_prose() {
        let cleaned = clean_code(
            "Sure thing, the implementation is below.\n\ndef add(a, b):\n    return a + b",
        );
        assert_eq!(cleaned, "def add(a, b):\n    return a + b");
    }

    #[test]
    fn test_clean_keeps_comment_led_code() {
        let cleaned = clean_code("# handles the empty case too\ndef f(x):\n    return x or 0");
        assert!(cleaned.starts_with("# handles"));
    }

    #[test]
    fn test_clean_passthrough_when_nothing_matches() {
        // No code-looking line at all: return the fence-stripped text as-is
        let cleaned = clean_code("just words");
        assert_eq!(cleaned, "just words");
    }

    #[tokio::test]
    async fn test_generate_single_shot_cleans_output() {
        let generator = Generator::new(
            Arc::new(FixedClient {
                content: "```python\ndef add(a: int, b: int) -> int:\n    return a + b\n```"
                    .to_string(),
            }),
            VoteConfig::default(),
        );

        let step = Step::new(StepKind::Generate, "Add two integers")
            .with_signature("def add(a: int, b: int) -> int");
        let outcome = generator
            .generate(&step, None, Language::Python, false)
            .await
            .unwrap();

        assert!(outcome.value.starts_with("def add"));
        assert!(!outcome.value.contains("```"));
        assert!(outcome.vote.is_none());
    }

    #[tokio::test]
    async fn test_generate_with_vote() {
        let generator = Generator::new(
            Arc::new(FixedClient {
                content: "def add(a: int, b: int) -> int:\n    return a + b".to_string(),
            }),
            VoteConfig::default().with_k(2).with_max_samples(5),
        );

        let step = Step::new(StepKind::Generate, "Add two integers")
            .with_signature("def add(a: int, b: int) -> int");
        let outcome = generator
            .generate(&step, None, Language::Python, true)
            .await
            .unwrap();

        assert!(outcome.value.starts_with("def add"));
        let vote = outcome.vote.expect("voting session attached");
        assert!(vote.winning_margin >= 2);
    }
}
