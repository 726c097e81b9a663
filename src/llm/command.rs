//! Command-line-backed LLM client.
//!
//! Wraps a local CLI binary (e.g. a headless `claude --print` invocation)
//! instead of a hosted API. Token counts are length-based estimates.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::client::LLMClient;
use super::types::{estimate_tokens, GenerationRequest, LLMResponse, StopReason};

/// LLM client that shells out to a local command.
pub struct CommandClient {
    program: PathBuf,
    /// Arguments placed before the prompt, e.g. `["--print"]`
    args: Vec<String>,
    timeout: Duration,
}

impl CommandClient {
    /// Resolve `program` on PATH (with `~` expansion) and build a client.
    pub fn new(program: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(program).into_owned();
        let resolved = which::which(&expanded)
            .map_err(|e| Error::Config(format!("LLM command '{}' not found: {}", program, e)))?;

        Ok(Self {
            program: resolved,
            args: vec!["--print".to_string()],
            timeout: Duration::from_secs(120),
        })
    }

    /// Override the fixed arguments placed before the prompt.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Override the subprocess timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, full_prompt: &str) -> Result<String> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(full_prompt)
            // Neutral working directory so the tool does not pick up
            // project-local configuration
            .current_dir(std::env::temp_dir())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| Error::llm(format!("Failed to spawn LLM command: {}", e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::timeout(self.timeout.as_millis() as u64))?
            .map_err(|e| Error::llm(format!("LLM command failed: {}", e)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(Error::llm(format!("LLM command error: {}", stderr)))
        }
    }
}

#[async_trait]
impl LLMClient for CommandClient {
    async fn generate(&self, request: GenerationRequest) -> Result<LLMResponse> {
        // Temperature/max_tokens/model are not forwardable to an opaque CLI;
        // the system prompt is prefixed instead.
        let full_prompt = match &request.system {
            Some(system) => format!("{}\n\n{}", system, request.prompt),
            None => request.prompt.clone(),
        };

        let content = self.run(&full_prompt).await?;

        Ok(LLMResponse {
            tokens_input: estimate_tokens(&full_prompt),
            tokens_output: estimate_tokens(&content),
            content,
            model: "command".to_string(),
            stop_reason: StopReason::EndTurn,
        })
    }
}
