//! Intent router: classifies free-form user input.
//!
//! Cheap keyword heuristics run first; only inconclusive messages go to the
//! LLM for a small JSON classification. Unknown labels and low-confidence
//! replies collapse to general chat.

use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::LazyLock;
use tracing::debug;

use crate::config::VoteConfig;
use crate::error::Result;
use crate::llm::{GenerationRequest, LLMClient};

/// Minimum LLM confidence to accept a classification.
const CONFIDENCE_FLOOR: f64 = 0.6;

static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[\s\S]*\}").expect("invalid regex"));

/// Closed set of user intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserIntent {
    // Tasks
    TaskSimple,
    TaskComplex,
    TaskExplore,

    // Meta
    MetaStatus,
    MetaExplain,
    MetaHelp,

    // Control
    ControlPause,
    ControlResume,
    ControlCancel,

    // Chat
    ChatGreeting,
    ChatGeneral,
    ChatQuestion,
}

impl UserIntent {
    /// Map an LLM label to an intent; unknown labels collapse to general
    /// chat rather than erroring.
    fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "TASK_SIMPLE" => Self::TaskSimple,
            "TASK_COMPLEX" => Self::TaskComplex,
            "TASK_EXPLORE" => Self::TaskExplore,
            "META_STATUS" => Self::MetaStatus,
            "META_EXPLAIN" => Self::MetaExplain,
            "META_HELP" => Self::MetaHelp,
            "CONTROL_PAUSE" => Self::ControlPause,
            "CONTROL_RESUME" => Self::ControlResume,
            "CONTROL_CANCEL" => Self::ControlCancel,
            "CHAT_GREETING" => Self::ChatGreeting,
            "CHAT_QUESTION" => Self::ChatQuestion,
            _ => Self::ChatGeneral,
        }
    }
}

/// Classification outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentResult {
    pub intent: UserIntent,
    /// 0.0 - 1.0
    pub confidence: f64,
    /// Task text extracted from the message, when applicable
    pub task: String,
    pub reasoning: String,
}

const CLASSIFY_PROMPT: &str = r#"Classify the user's intent in this message:

"{message}"

Possible categories:
- META_HELP: asks about capabilities ("what can you do", "help")
- TASK_COMPLEX: wants a complete system/project built
- TASK_SIMPLE: wants something small built (a function, a script)
- TASK_EXPLORE: wants to analyze/explore requirements
- META_STATUS: asks about progress
- META_EXPLAIN: asks why/what the pipeline is doing
- CONTROL_PAUSE / CONTROL_RESUME / CONTROL_CANCEL: pipeline control
- CHAT_GREETING: just a greeting (hi, hello)
- CHAT_QUESTION: a technical question
- CHAT_GENERAL: general conversation

Return your classification as JSON:
```json
{"intent": "CATEGORY", "confidence": 0.9, "task": "task description if applicable", "reasoning": "why"}
```"#;

#[derive(Debug, Deserialize)]
struct ClassificationReply {
    #[serde(default)]
    intent: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    task: String,
    #[serde(default)]
    reasoning: String,
}

fn default_confidence() -> f64 {
    0.7
}

/// Routes free-form input to an intent, heuristics first.
pub struct IntentRouter {
    client: Arc<dyn LLMClient>,
    config: VoteConfig,
}

impl IntentRouter {
    pub fn new(client: Arc<dyn LLMClient>, config: VoteConfig) -> Self {
        Self { client, config }
    }

    /// Classify a message.
    pub async fn detect(&self, message: &str) -> IntentResult {
        if let Some(local) = detect_local(message) {
            debug!(intent = ?local.intent, "intent matched locally");
            return local;
        }

        match self.detect_llm(message).await {
            Ok(result) => result,
            Err(e) => {
                debug!("intent classification failed, defaulting to chat: {}", e);
                IntentResult {
                    intent: UserIntent::ChatGeneral,
                    confidence: 0.5,
                    task: message.to_string(),
                    reasoning: format!("classification error: {}", e),
                }
            }
        }
    }

    async fn detect_llm(&self, message: &str) -> Result<IntentResult> {
        let prompt = CLASSIFY_PROMPT.replace("{message}", message);
        let response = self
            .client
            .generate(
                GenerationRequest::new(prompt)
                    .with_temperature(0.0)
                    .with_max_tokens(200)
                    .with_model(self.config.model.clone()),
            )
            .await?;

        Ok(parse_classification(&response.content, message))
    }
}

/// Keyword heuristics for the cheap cases. Returns `None` when
/// inconclusive so the LLM can decide.
fn detect_local(message: &str) -> Option<IntentResult> {
    let msg = message.trim().to_lowercase();

    // Control verbs are unambiguous on their own
    for (keyword, intent) in [
        ("pause", UserIntent::ControlPause),
        ("resume", UserIntent::ControlResume),
        ("cancel", UserIntent::ControlCancel),
    ] {
        if msg == keyword || msg == format!("/{}", keyword) {
            return Some(IntentResult {
                intent,
                confidence: 0.95,
                task: String::new(),
                reasoning: "local: control keyword".to_string(),
            });
        }
    }

    let help_markers = [
        "what can you do",
        "what do you do",
        "your capabilities",
        "help me",
        "help",
        "commands",
    ];
    if help_markers.iter().any(|m| msg.contains(m)) {
        return Some(IntentResult {
            intent: UserIntent::MetaHelp,
            confidence: 0.85,
            task: String::new(),
            reasoning: "local: capability question".to_string(),
        });
    }

    let task_verbs = ["build", "create", "make", "implement", "develop", "write"];
    let has_verb = task_verbs.iter().any(|v| msg.contains(v));

    let complex_markers = [
        "system",
        "project",
        "application",
        "app",
        "backend",
        "frontend",
        "database",
        "complete",
    ];
    if has_verb && complex_markers.iter().any(|m| msg.contains(m)) {
        return Some(IntentResult {
            intent: UserIntent::TaskComplex,
            confidence: 0.85,
            task: message.trim().to_string(),
            reasoning: "local: complex task".to_string(),
        });
    }

    let simple_markers = ["function", "validator", "script", "hello world"];
    if has_verb && simple_markers.iter().any(|m| msg.contains(m)) {
        return Some(IntentResult {
            intent: UserIntent::TaskSimple,
            confidence: 0.85,
            task: message.trim().to_string(),
            reasoning: "local: simple task".to_string(),
        });
    }

    let status_markers = ["status", "progress", "how far along"];
    if status_markers.iter().any(|m| msg.contains(m)) {
        return Some(IntentResult {
            intent: UserIntent::MetaStatus,
            confidence: 0.85,
            task: String::new(),
            reasoning: "local: status question".to_string(),
        });
    }

    let greetings = ["hi", "hello", "hey", "good morning", "good afternoon", "good evening"];
    let is_greeting = greetings.contains(&msg.as_str())
        || (msg.len() < 15 && greetings.iter().any(|g| msg.contains(g)) && !msg.contains('?'));
    if is_greeting {
        return Some(IntentResult {
            intent: UserIntent::ChatGreeting,
            confidence: 0.9,
            task: String::new(),
            reasoning: "local: greeting".to_string(),
        });
    }

    None
}

/// Parse the LLM's JSON classification; anything malformed or
/// low-confidence becomes general chat.
pub(crate) fn parse_classification(response: &str, original_message: &str) -> IntentResult {
    let fallback = || IntentResult {
        intent: UserIntent::ChatGeneral,
        confidence: 0.5,
        task: original_message.to_string(),
        reasoning: "could not classify with confidence".to_string(),
    };

    let Some(found) = JSON_OBJECT.find(response) else {
        return fallback();
    };

    let Ok(reply) = serde_json::from_str::<ClassificationReply>(found.as_str()) else {
        return fallback();
    };

    if reply.confidence < CONFIDENCE_FLOOR {
        return fallback();
    }

    let task = if reply.task.is_empty() {
        original_message.to_string()
    } else {
        reply.task
    };

    IntentResult {
        intent: UserIntent::from_label(&reply.intent),
        confidence: reply.confidence,
        task,
        reasoning: reply.reasoning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMResponse, StopReason};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient {
        reply: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LLMClient for CountingClient {
        async fn generate(&self, _request: GenerationRequest) -> Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(LLMResponse {
                content: self.reply.clone(),
                tokens_input: 30,
                tokens_output: 30,
                model: "stub".to_string(),
                stop_reason: StopReason::EndTurn,
            })
        }
    }

    fn router(reply: &str) -> (IntentRouter, Arc<CountingClient>) {
        let client = Arc::new(CountingClient {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        });
        (
            IntentRouter::new(client.clone(), VoteConfig::default()),
            client,
        )
    }

    #[tokio::test]
    async fn test_greeting_never_hits_llm() {
        let (router, client) = router("irrelevant");
        let result = router.detect("hello").await;
        assert_eq!(result.intent, UserIntent::ChatGreeting);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_control_keywords() {
        let (router, _) = router("irrelevant");
        assert_eq!(router.detect("pause").await.intent, UserIntent::ControlPause);
        assert_eq!(router.detect("/resume").await.intent, UserIntent::ControlResume);
        assert_eq!(router.detect("cancel").await.intent, UserIntent::ControlCancel);
    }

    #[tokio::test]
    async fn test_complex_task_locally() {
        let (router, client) = router("irrelevant");
        let result = router.detect("build a complete auth system with a database").await;
        assert_eq!(result.intent, UserIntent::TaskComplex);
        assert!(result.task.contains("auth system"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_simple_task_locally() {
        let (router, _) = router("irrelevant");
        let result = router.detect("write a function that parses dates").await;
        assert_eq!(result.intent, UserIntent::TaskSimple);
    }

    #[tokio::test]
    async fn test_inconclusive_goes_to_llm() {
        let (router, client) = router(
            r#"{"intent": "CHAT_QUESTION", "confidence": 0.9, "task": "", "reasoning": "technical question"}"#,
        );
        let result = router.detect("why are monads burritos?").await;
        assert_eq!(result.intent, UserIntent::ChatQuestion);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_falls_back_to_chat() {
        let (router, _) = router(
            r#"{"intent": "TASK_COMPLEX", "confidence": 0.4, "task": "", "reasoning": "unsure"}"#,
        );
        let result = router.detect("hmm interesting stuff").await;
        assert_eq!(result.intent, UserIntent::ChatGeneral);
    }

    #[test]
    fn test_unknown_label_collapses_to_chat() {
        let result = parse_classification(
            r#"{"intent": "MAKE_COFFEE", "confidence": 0.99}"#,
            "original",
        );
        assert_eq!(result.intent, UserIntent::ChatGeneral);
        assert_eq!(result.confidence, 0.99);
    }

    #[test]
    fn test_markdown_wrapped_json_parses() {
        let result = parse_classification(
            "```json\n{\"intent\": \"META_STATUS\", \"confidence\": 0.8}\n```",
            "original",
        );
        assert_eq!(result.intent, UserIntent::MetaStatus);
    }

    #[test]
    fn test_garbage_reply_falls_back() {
        let result = parse_classification("no json here", "original");
        assert_eq!(result.intent, UserIntent::ChatGeneral);
        assert_eq!(result.task, "original");
    }
}
