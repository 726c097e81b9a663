//! Validate: generated code -> review verdict.
//!
//! Two layers: a cheap static pass (bracket balance) first, then an LLM
//! review only when the static pass is clean. Any static error
//! short-circuits the LLM call.

use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::config::VoteConfig;
use crate::error::Result;
use crate::llm::{GenerationRequest, LLMClient};
use crate::types::{ContextSnapshot, Language, Step, StepKind};
use crate::vote::Voter;

const VALIDATE_SYSTEM: &str = "You are an expert code reviewer.\n\
Review the code for correctness, bugs, and best practices.\n\n\
Check for:\n\
1. Logic errors\n\
2. Edge cases not handled\n\
3. Type mismatches\n\
4. Missing error handling\n\
5. Security issues\n\
6. Performance problems\n\n\
Be thorough but fair. Only flag real issues.\n\n\
Output format:\n\
VALID: yes/no\n\
ERRORS: [list of errors]\n\
WARNINGS: [list of warnings]\n\
SUGGESTIONS: [list of improvements]";

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationReport {
    /// Valid and error-free.
    pub fn passed(&self) -> bool {
        self.is_valid && self.errors.is_empty()
    }
}

fn validate_prompt(code: &str, step: &Step, context: &str) -> String {
    format!(
        "Code to review:\n```\n{}\n```\n\nSpecification:\n{}\n{}\n\nContext:\n{}\n\nReview this code:",
        code, step.signature, step.description, context
    )
}

/// Validates generated code with a static pass then an LLM review.
pub struct Validator {
    client: Arc<dyn LLMClient>,
    config: VoteConfig,
    cancel: CancelToken,
}

impl Validator {
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

    /// Validate code against the step it implements.
    pub async fn validate(
        &self,
        code: &str,
        step: &Step,
        snapshot: Option<&ContextSnapshot>,
        language: Language,
    ) -> Result<ValidationReport> {
        let static_errors = static_validate(code, language);
        if !static_errors.is_empty() {
            return Ok(ValidationReport {
                is_valid: false,
                errors: static_errors,
                warnings: Vec::new(),
                suggestions: Vec::new(),
            });
        }

        let context_text = snapshot.map(|s| s.to_prompt_context()).unwrap_or_default();
        let prompt = validate_prompt(code, step, &context_text);

        let response = self
            .client
            .generate(
                GenerationRequest::new(prompt)
                    .with_system(VALIDATE_SYSTEM)
                    .with_temperature(0.0)
                    .with_max_tokens(500)
                    .with_model(self.config.model.clone()),
            )
            .await?;

        Ok(parse_validation(&response.content))
    }

    /// Strict validation by vote: several reviewers answer VALID/INVALID
    /// and the consensus answer wins.
    pub async fn validate_with_vote(
        &self,
        code: &str,
        step: &Step,
        language: Language,
    ) -> Result<bool> {
        let vote_step = Step::new(StepKind::Validate, format!("Validate: {}", step.description));
        let prompt = format!(
            "Is this code correct and complete?\nCode:\n```\n{}\n```\n\n\
             Specification: {}\n{}\n\nAnswer ONLY \"VALID\" or \"INVALID\" followed by reason.",
            code, step.signature, step.description
        );

        let request_template = GenerationRequest::new(prompt)
            .with_system("You are a code reviewer. Be strict.")
            .with_temperature(self.config.temperature)
            .with_max_tokens(100)
            .with_model(self.config.model.clone());
        let client = self.client.clone();

        let mut voter =
            Voter::new(self.client.clone(), self.config.clone()).with_cancel(self.cancel.clone());
        let result = voter
            .vote(&vote_step, code, language, move |_step, _ctx| {
                let client = client.clone();
                let request = request_template.clone();
                async move { client.generate(request).await }
            })
            .await?;

        Ok(result.winner.content.to_uppercase().contains("VALID")
            && !result.winner.content.to_uppercase().contains("INVALID"))
    }
}

/// Static validation: bracket balance via the red-flag syntax machinery.
fn static_validate(code: &str, language: Language) -> Vec<String> {
    let candidate = crate::types::Candidate::new(code, 0);
    let mut config = VoteConfig::default();
    config.enable_length_check = false;
    config.enable_format_check = false;
    let filter = crate::vote::RedFlagFilter::new(config);

    let result = filter.check(&candidate, language);
    match result.reason {
        Some(reason) if !result.passed => vec![format!("Syntax error: {}", reason)],
        _ => Vec::new(),
    }
}

/// Parse the `VALID/ERRORS/WARNINGS/SUGGESTIONS` reviewer reply.
pub(crate) fn parse_validation(text: &str) -> ValidationReport {
    let mut report = ValidationReport {
        is_valid: true,
        ..Default::default()
    };

    enum Section {
        Errors,
        Warnings,
        Suggestions,
    }
    let mut current: Option<Section> = None;

    for line in text.trim().lines() {
        let line = line.trim();
        let upper = line.to_uppercase();

        if let Some(rest) = upper.strip_prefix("VALID:") {
            report.is_valid = matches!(rest.trim(), "YES" | "TRUE" | "1");
        } else if upper.starts_with("ERRORS:") {
            current = Some(Section::Errors);
            report.errors.extend(parse_inline_list(line));
        } else if upper.starts_with("WARNINGS:") {
            current = Some(Section::Warnings);
            report.warnings.extend(parse_inline_list(line));
        } else if upper.starts_with("SUGGESTIONS:") {
            current = Some(Section::Suggestions);
            report.suggestions.extend(parse_inline_list(line));
        } else if let Some(item) = line.strip_prefix('-') {
            let item = item.trim();
            if !item.is_empty() {
                match current {
                    Some(Section::Errors) => report.errors.push(item.to_string()),
                    Some(Section::Warnings) => report.warnings.push(item.to_string()),
                    Some(Section::Suggestions) => report.suggestions.push(item.to_string()),
                    None => {}
                }
            }
        }
    }

    report
}

/// Items on the same line as the section header, `[a, b]` or comma lists.
fn parse_inline_list(line: &str) -> Vec<String> {
    let rest = match line.split_once(':') {
        Some((_, rest)) => rest.trim(),
        None => return Vec::new(),
    };

    if rest.is_empty() || rest == "[]" {
        return Vec::new();
    }

    if rest.starts_with('[') {
        if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(rest) {
            return items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect();
        }
    }

    rest.trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMResponse, StopReason};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient {
        content: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LLMClient for CountingClient {
        async fn generate(&self, _request: GenerationRequest) -> Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(LLMResponse {
                content: self.content.clone(),
                tokens_input: 40,
                tokens_output: 20,
                model: "stub".to_string(),
                stop_reason: StopReason::EndTurn,
            })
        }

        async fn compare_semantic(&self, _a: &str, _b: &str, _c: &str) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_parse_clean_report() {
        let report = parse_validation("VALID: yes\nERRORS: []\nWARNINGS: []\nSUGGESTIONS: []");
        assert!(report.is_valid);
        assert!(report.passed());
    }

    #[test]
    fn test_parse_report_with_sections() {
        let report = parse_validation(
            "VALID: no\nERRORS:\n- off by one in loop bound\nWARNINGS: [unused import]\n\
             SUGGESTIONS:\n- add a docstring",
        );
        assert!(!report.is_valid);
        assert_eq!(report.errors, vec!["off by one in loop bound"]);
        assert_eq!(report.warnings, vec!["unused import"]);
        assert_eq!(report.suggestions, vec!["add a docstring"]);
        assert!(!report.passed());
    }

    #[test]
    fn test_parse_inline_json_list() {
        let report = parse_validation(r#"VALID: no
ERRORS: ["missing return", "wrong type"]"#);
        assert_eq!(report.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_static_error_short_circuits_llm() {
        let client = Arc::new(CountingClient {
            content: "VALID: yes".to_string(),
            calls: AtomicUsize::new(0),
        });
        let validator = Validator::new(client.clone(), VoteConfig::default());

        let step = Step::new(StepKind::Generate, "broken");
        let report = validator
            .validate("def f(:\n    return [1, 2", &step, None, Language::Python)
            .await
            .unwrap();

        assert!(!report.is_valid);
        assert!(report.errors[0].contains("Syntax error"));
        // The reviewer never ran
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clean_code_reaches_reviewer() {
        let client = Arc::new(CountingClient {
            content: "VALID: yes\nERRORS: []".to_string(),
            calls: AtomicUsize::new(0),
        });
        let validator = Validator::new(client.clone(), VoteConfig::default());

        let step = Step::new(StepKind::Generate, "fine");
        let report = validator
            .validate(
                "def f(x):\n    return x + 1",
                &step,
                None,
                Language::Python,
            )
            .await
            .unwrap();

        assert!(report.passed());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
