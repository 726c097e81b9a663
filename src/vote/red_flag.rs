//! Red-flag filter: cheap candidate rejection before semantic grouping.
//!
//! Rejects responses that are too long (confusion correlates with length),
//! badly formatted (prose masquerading as code), or syntactically broken.
//! Checks are deterministic and pure; they never touch the network.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::config::VoteConfig;
use crate::types::{Candidate, Language};

/// Prose openers that indicate an explanation instead of code.
static EXPLANATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^Here'?s?\s+(the|a|an)\s+",
        r"(?i)^I'?ll\s+",
        r"(?i)^This\s+(function|code|implementation)",
        r"(?i)^The\s+following",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid regex"))
    .collect()
});

/// Fenced code-block wrapper, optionally language-tagged.
static FENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:python|typescript|javascript|js|ts)?\n?(.*?)```").expect("invalid regex")
});

/// Verdict from the red-flag filter.
#[derive(Debug, Clone, PartialEq)]
pub struct RedFlagResult {
    pub passed: bool,
    pub reason: Option<String>,
    /// Which checks ran and their outcomes, in order
    pub checks: BTreeMap<&'static str, bool>,
}

impl RedFlagResult {
    fn pass(checks: BTreeMap<&'static str, bool>) -> Self {
        Self {
            passed: true,
            reason: None,
            checks,
        }
    }

    fn fail(reason: impl Into<String>, checks: BTreeMap<&'static str, bool>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
            checks,
        }
    }
}

/// Quality filter for code candidates.
#[derive(Debug, Clone)]
pub struct RedFlagFilter {
    config: VoteConfig,
}

impl RedFlagFilter {
    pub fn new(config: VoteConfig) -> Self {
        Self { config }
    }

    /// Run all enabled checks in order, short-circuiting on first failure.
    pub fn check(&self, candidate: &Candidate, language: Language) -> RedFlagResult {
        let mut checks = BTreeMap::new();

        if self.config.enable_length_check {
            let length_ok = candidate.tokens_output <= self.config.max_tokens_response as u64;
            checks.insert("length", length_ok);
            if !length_ok {
                return RedFlagResult::fail(
                    format!(
                        "Response too long ({} tokens > {})",
                        candidate.tokens_output, self.config.max_tokens_response
                    ),
                    checks,
                );
            }
        }

        if self.config.enable_format_check {
            if let Some(reason) = check_format(&candidate.content) {
                checks.insert("format", false);
                return RedFlagResult::fail(reason, checks);
            }
            checks.insert("format", true);
        }

        if self.config.enable_syntax_check {
            if let Some(reason) = check_syntax(&candidate.content, language) {
                checks.insert("syntax", false);
                return RedFlagResult::fail(reason, checks);
            }
            checks.insert("syntax", true);
        }

        RedFlagResult::pass(checks)
    }
}

/// Basic format check: non-empty, long enough, not a prose explanation.
fn check_format(content: &str) -> Option<String> {
    let code = content.trim();

    if code.is_empty() {
        return Some("Empty code".to_string());
    }

    if code.len() < 10 {
        return Some("Code too short".to_string());
    }

    for pattern in EXPLANATION_PATTERNS.iter() {
        if pattern.is_match(code) {
            return Some("Contains explanation instead of code".to_string());
        }
    }

    None
}

/// Syntax check: strip any fenced wrapper, then verify bracket balance.
///
/// No target language here has a bundled grammar, so the string-aware
/// bracket check is the syntax gate for all of them.
fn check_syntax(content: &str, _language: Language) -> Option<String> {
    let code = extract_code(content);
    check_brackets(&code)
}

/// Extract code from a fenced block if present, otherwise trim.
fn extract_code(text: &str) -> String {
    if let Some(captures) = FENCE_PATTERN.captures(text) {
        return captures[1].trim().to_string();
    }
    text.trim().to_string()
}

/// Balanced-bracket check that ignores brackets inside string literals.
fn check_brackets(code: &str) -> Option<String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut string_char = '\0';

    for ch in code.chars() {
        if !in_string && (ch == '"' || ch == '\'' || ch == '`') {
            in_string = true;
            string_char = ch;
        } else if in_string && ch == string_char {
            in_string = false;
        } else if !in_string {
            match ch {
                '{' => stack.push('}'),
                '[' => stack.push(']'),
                '(' => stack.push(')'),
                '}' | ']' | ')' => {
                    if stack.pop() != Some(ch) {
                        return Some(format!("Unbalanced brackets at '{}'", ch));
                    }
                }
                _ => {}
            }
        }
    }

    if stack.is_empty() {
        None
    } else {
        Some(format!("Unclosed brackets: {:?}", stack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> RedFlagFilter {
        RedFlagFilter::new(VoteConfig::default())
    }

    #[test]
    fn test_valid_code_passes() {
        let candidate = Candidate::new("def add(a, b):\n    return a + b", 20);
        let result = filter().check(&candidate, Language::Python);
        assert!(result.passed);
        assert!(result.reason.is_none());
        assert_eq!(result.checks.len(), 3);
    }

    #[test]
    fn test_too_long_rejected() {
        let candidate = Candidate::new("def f(): pass", 1000);
        let result = filter().check(&candidate, Language::Python);
        assert!(!result.passed);
        assert!(result.reason.unwrap().contains("too long"));
    }

    #[test]
    fn test_empty_rejected() {
        let candidate = Candidate::new("   ", 1);
        let result = filter().check(&candidate, Language::Python);
        assert!(!result.passed);
        assert_eq!(result.reason.as_deref(), Some("Empty code"));
    }

    #[test]
    fn test_too_short_rejected() {
        let candidate = Candidate::new("x = 1", 2);
        let result = filter().check(&candidate, Language::Python);
        assert!(!result.passed);
        assert_eq!(result.reason.as_deref(), Some("Code too short"));
    }

    #[test]
    fn test_prose_openers_rejected() {
        for prose in [
            "Here's the function you asked for: def f(): pass",
            "I'll implement this step by step",
            "This function validates emails",
            "The following code does the job",
        ] {
            let candidate = Candidate::new(prose, 20);
            let result = filter().check(&candidate, Language::Python);
            assert!(!result.passed, "expected rejection for: {}", prose);
            assert_eq!(
                result.reason.as_deref(),
                Some("Contains explanation instead of code")
            );
        }
    }

    #[test]
    fn test_unbalanced_brackets_rejected() {
        let candidate = Candidate::new("function f() { return [1, 2;", 20);
        let result = filter().check(&candidate, Language::TypeScript);
        assert!(!result.passed);
        assert!(result.reason.unwrap().contains("brackets"));
    }

    #[test]
    fn test_brackets_in_strings_ignored() {
        let candidate = Candidate::new("msg = \"unmatched ) ] } here\"\nprint(msg)", 20);
        let result = filter().check(&candidate, Language::Python);
        assert!(result.passed, "{:?}", result.reason);
    }

    #[test]
    fn test_fenced_block_stripped_before_syntax() {
        let candidate = Candidate::new("```python\ndef f(x):\n    return (x + 1)\n```", 20);
        let result = filter().check(&candidate, Language::Python);
        assert!(result.passed, "{:?}", result.reason);
    }

    #[test]
    fn test_checks_can_be_disabled() {
        let mut config = VoteConfig::default();
        config.enable_length_check = false;
        config.enable_format_check = false;
        config.enable_syntax_check = false;
        let filter = RedFlagFilter::new(config);

        // Would fail every enabled check
        let candidate = Candidate::new("", 100_000);
        let result = filter.check(&candidate, Language::Python);
        assert!(result.passed);
        assert!(result.checks.is_empty());
    }

    #[test]
    fn test_idempotent_and_pure() {
        let candidate = Candidate::new("def f():\n    return 'ok'", 15);
        let first = filter().check(&candidate, Language::Python);
        let second = filter().check(&candidate, Language::Python);
        assert_eq!(first, second);
    }

    #[test]
    fn test_extract_code_without_fence() {
        assert_eq!(extract_code("  x = 1  "), "x = 1");
    }
}
