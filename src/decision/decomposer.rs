//! Decompose: requirements -> ordered function plan.
//!
//! Top-down structuring of expanded requirements into function steps,
//! ordered so dependencies precede dependents.

use regex::Regex;
use serde::Deserialize;
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

const DECOMPOSE_SYSTEM: &str = "You are an expert software architect.\n\
Given requirements, decompose them into functions/methods.\n\n\
IMPORTANT:\n\
- Each function must be ATOMIC (one responsibility)\n\
- Each function must have a CLEAR signature\n\
- Include type hints\n\
- Order functions by dependency (dependencies first)\n\
- Keep functions SMALL (< 30 lines ideally)\n\n\
Output format: JSON array of objects with:\n\
- signature: function signature with types\n\
- description: what the function does\n\
- dependencies: list of other function names it calls\n\
- requirements: list of requirement indices it implements";

static JSON_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[\s\S]*\]").expect("invalid regex"));

/// Function-shaped lines in free text, per language family.
static PYTHON_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)((?:async\s+)?def\s+\w+\s*\([^)]*\)\s*(?:->\s*[^:]+)?):").expect("invalid regex")
});
static TS_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)((?:async\s+)?function\s+\w+\s*\([^)]*\)(?:\s*:\s*\w+)?)").expect("invalid regex")
});

/// Shape of one planned function in the LLM's JSON reply.
#[derive(Debug, Deserialize)]
struct PlannedFunction {
    #[serde(default)]
    signature: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    requirements: Vec<u32>,
}

fn decompose_prompt(requirements: &[String], language: Language) -> String {
    let requirements_text: Vec<String> = requirements
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}", i, r))
        .collect();

    format!(
        "Requirements:\n{}\n\nLanguage: {}\n\n\
         Decompose these requirements into functions.\n\
         Each function should implement one or more requirements.\n\
         Order by dependencies (implement base functions first).\n\n\
         Output as JSON array:",
        requirements_text.join("\n"),
        language
    )
}

/// Organises requirements into function steps, optionally through voting.
pub struct Decomposer {
    client: Arc<dyn LLMClient>,
    config: VoteConfig,
    cancel: CancelToken,
}

impl Decomposer {
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

    /// Decompose requirements into `Generate` steps.
    ///
    /// Empty requirements produce an empty plan without an LLM call.
    pub async fn decompose(
        &self,
        requirements: &[String],
        language: Language,
        _snapshot: Option<&ContextSnapshot>,
        use_vote: bool,
    ) -> Result<DecisionOutcome<Vec<Step>>> {
        if requirements.is_empty() {
            debug!("no requirements to decompose");
            return Ok(DecisionOutcome::single(Vec::new()));
        }

        let prompt = decompose_prompt(requirements, language);

        if use_vote {
            let step = Step::new(StepKind::Decompose, "Decompose requirements into functions");
            let request_template = self.request(&prompt);
            let client = self.client.clone();

            let mut voter =
                Voter::new(self.client.clone(), self.config.clone()).with_cancel(self.cancel.clone());
            let result = voter
                .vote(&step, &prompt, language, move |_step, _ctx| {
                    let client = client.clone();
                    let request = request_template.clone();
                    async move { client.generate(request).await }
                })
                .await?;

            let steps = parse_functions(&result.winner.content, language);
            Ok(DecisionOutcome::voted(steps, result))
        } else {
            let response = self.client.generate(self.request(&prompt)).await?;
            Ok(DecisionOutcome::single(parse_functions(
                &response.content,
                language,
            )))
        }
    }

    fn request(&self, prompt: &str) -> GenerationRequest {
        GenerationRequest::new(prompt)
            .with_system(DECOMPOSE_SYSTEM)
            .with_temperature(self.config.temperature)
            .with_max_tokens(2000)
            .with_model(self.config.model.clone())
    }
}

/// Parse a decompose response into `Generate` steps.
///
/// Primary: JSON array of `{signature, description, dependencies,
/// requirements}` objects. Fallback: regex over function-shaped lines.
pub(crate) fn parse_functions(text: &str, language: Language) -> Vec<Step> {
    let text = text.trim();

    if let Some(found) = JSON_ARRAY.find(text) {
        if let Ok(planned) = serde_json::from_str::<Vec<PlannedFunction>>(found.as_str()) {
            let steps: Vec<Step> = planned
                .into_iter()
                .filter(|p| !p.signature.is_empty() || !p.description.is_empty())
                .map(|p| {
                    let context = serde_json::json!({
                        "dependencies": p.dependencies,
                        "requirements": p.requirements,
                    })
                    .to_string();
                    Step::new(StepKind::Generate, p.description)
                        .with_signature(p.signature)
                        .with_context(context)
                })
                .collect();
            if steps.is_empty() {
                debug!("decompose response parsed to an empty function list");
            }
            return steps;
        }
    }

    // Fallback: pull out anything that looks like a signature
    let pattern = match language {
        Language::Python => &*PYTHON_DEF,
        Language::TypeScript => &*TS_FUNCTION,
    };

    let steps: Vec<Step> = pattern
        .captures_iter(text)
        .map(|captures| {
            let signature = captures[1].trim().to_string();
            Step::new(StepKind::Generate, format!("Implement {}", signature))
                .with_signature(signature)
        })
        .collect();

    if steps.is_empty() {
        warn!("decompose response was unparseable as JSON or signatures");
    }
    steps
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
                tokens_output: 80,
                model: "stub".to_string(),
                stop_reason: StopReason::EndTurn,
            })
        }

        async fn compare_semantic(&self, _a: &str, _b: &str, _c: &str) -> Result<bool> {
            Ok(true)
        }
    }

    const PLAN_JSON: &str = r#"[
      {
        "signature": "def validate_email(email: str) -> bool",
        "description": "Validates email format using regex",
        "dependencies": [],
        "requirements": [0]
      },
      {
        "signature": "def create_user(email: str, password: str) -> dict",
        "description": "Creates a user record",
        "dependencies": ["validate_email"],
        "requirements": [1, 2]
      }
    ]"#;

    #[test]
    fn test_parse_json_plan() {
        let steps = parse_functions(PLAN_JSON, Language::Python);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].kind, StepKind::Generate);
        assert!(steps[0].signature.starts_with("def validate_email"));
        assert!(steps[1].context.contains("validate_email"));
    }

    #[test]
    fn test_parse_python_def_fallback() {
        let steps = parse_functions(
            "You should write:\ndef validate_email(email: str) -> bool:\n    ...\n\
             async def fetch_user(id: int):\n    ...",
            Language::Python,
        );
        assert_eq!(steps.len(), 2);
        assert!(steps[1].signature.starts_with("async def fetch_user"));
    }

    #[test]
    fn test_parse_ts_function_fallback() {
        let steps = parse_functions(
            "function validateEmail(email: string): boolean\nfunction createUser(email: string)",
            Language::TypeScript,
        );
        assert_eq!(steps.len(), 2);
        assert!(steps[0].signature.contains("validateEmail"));
    }

    #[test]
    fn test_parse_garbage_yields_empty() {
        assert!(parse_functions("no functions here", Language::Python).is_empty());
    }

    #[tokio::test]
    async fn test_empty_requirements_short_circuit() {
        let decomposer = Decomposer::new(
            Arc::new(FixedClient {
                content: PLAN_JSON.to_string(),
            }),
            VoteConfig::default(),
        );

        let outcome = decomposer
            .decompose(&[], Language::Python, None, true)
            .await
            .unwrap();
        assert!(outcome.value.is_empty());
        assert!(outcome.vote.is_none());
    }

    #[tokio::test]
    async fn test_decompose_with_vote() {
        let decomposer = Decomposer::new(
            Arc::new(FixedClient {
                content: PLAN_JSON.to_string(),
            }),
            VoteConfig::default().with_k(1).with_max_samples(5),
        );

        let requirements = vec!["Validate email".to_string(), "Create user".to_string()];
        let outcome = decomposer
            .decompose(&requirements, Language::Python, None, true)
            .await
            .unwrap();

        assert_eq!(outcome.value.len(), 2);
        assert!(outcome.vote.is_some());
    }
}
