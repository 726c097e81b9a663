//! Test execution and interpreter-backed checks.
//!
//! These shell out to a Python interpreter; on machines without one the
//! tools return a failed result rather than erroring.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::Result;
use crate::types::ExecutionResult;

use super::{require_arg, Tool, ToolArgs};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn python_binary() -> Option<std::path::PathBuf> {
    which::which("python3")
        .or_else(|_| which::which("python"))
        .ok()
}

async fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
    label: &str,
) -> Result<ExecutionResult> {
    command.stdout(Stdio::piped()).stderr(Stdio::piped());

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Ok(ExecutionResult::failed(format!(
                "{} failed to start: {}",
                label, e
            )))
        }
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Ok(ExecutionResult::failed(format!("{} failed: {}", label, e))),
        Err(_) => {
            return Ok(ExecutionResult::failed(format!(
                "{} timed out after {}s",
                label,
                timeout.as_secs()
            )))
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if output.status.success() {
        Ok(ExecutionResult::ok(stdout))
    } else {
        Ok(ExecutionResult {
            success: false,
            output: stdout,
            error: Some(if stderr.is_empty() {
                format!("{} exited with {}", label, output.status)
            } else {
                stderr
            }),
            data: None,
        })
    }
}

/// `pytest:path=...` - run a pytest suite.
///
/// Optional: `pattern` (passed as `-k`), `verbose`, `timeout` (seconds).
pub struct PytestRunner {
    timeout: Duration,
}

impl Default for PytestRunner {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl PytestRunner {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for PytestRunner {
    fn name(&self) -> &'static str {
        "pytest"
    }

    async fn execute(&self, args: ToolArgs) -> Result<ExecutionResult> {
        let Some(python) = python_binary() else {
            return Ok(ExecutionResult::failed("No python interpreter on PATH"));
        };

        let path = args.get("path").map(String::as_str).unwrap_or(".");
        let timeout = args
            .get("timeout")
            .and_then(|t| t.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);

        let mut command = Command::new(python);
        command.arg("-m").arg("pytest").arg(path);
        if let Some(pattern) = args.get("pattern") {
            command.arg("-k").arg(pattern);
        }
        if args.get("verbose").map(String::as_str) == Some("true") {
            command.arg("-v");
        }

        run_with_timeout(command, timeout, "pytest").await
    }
}

/// `python_check:path=...` or `python_check:code=...` - compile-check
/// Python source without executing it.
pub struct SyntaxCheck {
    timeout: Duration,
}

impl Default for SyntaxCheck {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl SyntaxCheck {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for SyntaxCheck {
    fn name(&self) -> &'static str {
        "python_check"
    }

    fn validate_args(&self, args: &ToolArgs) -> Option<String> {
        if args.contains_key("path") || args.contains_key("code") {
            None
        } else {
            Some("python_check requires 'path' or 'code'".to_string())
        }
    }

    async fn execute(&self, args: ToolArgs) -> Result<ExecutionResult> {
        let Some(python) = python_binary() else {
            return Ok(ExecutionResult::failed("No python interpreter on PATH"));
        };

        let mut command = Command::new(python);
        if let Some(path) = args.get("path") {
            command.arg("-m").arg("py_compile").arg(path);
        } else {
            let code = require_arg(&args, "code", self.name())?;
            command
                .arg("-c")
                .arg("import sys; compile(sys.argv[1], '<candidate>', 'exec')")
                .arg(code);
        }

        let result = run_with_timeout(command, self.timeout, "python_check").await?;
        if result.success {
            Ok(ExecutionResult::ok("Syntax OK"))
        } else {
            Ok(result)
        }
    }
}

/// `import_check:module=...` - verify a module imports cleanly.
pub struct ImportCheck {
    timeout: Duration,
}

impl Default for ImportCheck {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ImportCheck {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for ImportCheck {
    fn name(&self) -> &'static str {
        "import_check"
    }

    async fn execute(&self, args: ToolArgs) -> Result<ExecutionResult> {
        let Some(python) = python_binary() else {
            return Ok(ExecutionResult::failed("No python interpreter on PATH"));
        };

        let module = require_arg(&args, "module", self.name())?;
        if !module
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Ok(ExecutionResult::failed(format!(
                "Invalid module name '{}'",
                module
            )));
        }

        let mut command = Command::new(python);
        command
            .arg("-c")
            .arg(format!("import {}", module));

        let result = run_with_timeout(command, self.timeout, "import_check").await?;
        if result.success {
            Ok(ExecutionResult::ok(format!("Module '{}' imports", module)))
        } else {
            Ok(result)
        }
    }
}
