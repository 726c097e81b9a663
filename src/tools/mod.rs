//! Deterministic tool operations.
//!
//! Tools never involve the LLM or voting: they read files, search code, and
//! run tests, returning a uniform [`ExecutionResult`]. They are dispatched
//! when a `Read`/`Search`/`Test`/`Apply` step is executed. The registry is
//! injected wherever it is needed; there is no global instance.

mod file_ops;
mod search;
mod test_runner;

pub use file_ops::{AppendFile, ListDir, ReadFile, WriteFile};
pub use search::{FindFunction, GlobFiles, Grep};
pub use test_runner::{ImportCheck, PytestRunner, SyntaxCheck};

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{ExecutionResult, Step};

/// Keyword arguments for a tool invocation.
pub type ToolArgs = HashMap<String, String>;

/// A deterministic operation keyed by a short name.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry key, e.g. `read`, `grep`, `pytest`.
    fn name(&self) -> &'static str;

    /// Execute with keyword arguments.
    async fn execute(&self, args: ToolArgs) -> Result<ExecutionResult>;

    /// Validate arguments before execution; `Some(reason)` rejects.
    fn validate_args(&self, _args: &ToolArgs) -> Option<String> {
        None
    }
}

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the standard tool set.
    pub fn with_defaults() -> Self {
        Self::with_execution_timeout(std::time::Duration::from_secs(30))
    }

    /// Standard tool set with a caller-chosen subprocess timeout.
    pub fn with_execution_timeout(timeout: std::time::Duration) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ReadFile));
        registry.register(Box::new(WriteFile));
        registry.register(Box::new(AppendFile));
        registry.register(Box::new(ListDir));
        registry.register(Box::new(Grep::default()));
        registry.register(Box::new(GlobFiles::default()));
        registry.register(Box::new(FindFunction));
        registry.register(Box::new(PytestRunner::with_timeout(timeout)));
        registry.register(Box::new(SyntaxCheck::with_timeout(timeout)));
        registry.register(Box::new(ImportCheck::with_timeout(timeout)));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Dispatch a tool step by its action string.
    ///
    /// Action format: `tool_name:key=value,key=value` or `tool_name:path`
    /// (a bare argument is treated as `path`). Tool failures come back as a
    /// failed [`ExecutionResult`], not an `Err`.
    pub async fn execute_step(&self, step: &Step) -> ExecutionResult {
        let Some(action) = step.action.as_deref() else {
            return ExecutionResult::failed("Step has no action specified");
        };

        let (name, args) = parse_action(action);
        let Some(tool) = self.get(&name) else {
            return ExecutionResult::failed(format!("Unknown tool: {}", name));
        };

        if let Some(reason) = tool.validate_args(&args) {
            return ExecutionResult::failed(reason);
        }

        match tool.execute(args).await {
            Ok(result) => result,
            Err(e) => ExecutionResult::failed(e.to_string()),
        }
    }
}

/// Split `tool:args` into the tool name and keyword arguments.
pub(crate) fn parse_action(action: &str) -> (String, ToolArgs) {
    let (name, rest) = match action.split_once(':') {
        Some((name, rest)) => (name.trim().to_string(), rest.trim()),
        None => (action.trim().to_string(), ""),
    };

    let mut args = ToolArgs::new();
    if rest.is_empty() {
        return (name, args);
    }

    if rest.contains('=') {
        for pair in rest.split(',') {
            if let Some((key, value)) = pair.split_once('=') {
                args.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    } else {
        args.insert("path".to_string(), rest.to_string());
    }

    (name, args)
}

/// Fetch a required argument.
pub(crate) fn require_arg<'a>(args: &'a ToolArgs, key: &str, tool: &str) -> Result<&'a str> {
    args.get(key)
        .map(String::as_str)
        .ok_or_else(|| Error::tool(tool, format!("missing required argument '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StepKind;

    #[test]
    fn test_parse_action_bare_path() {
        let (name, args) = parse_action("read:src/main.py");
        assert_eq!(name, "read");
        assert_eq!(args.get("path").map(String::as_str), Some("src/main.py"));
    }

    #[test]
    fn test_parse_action_keyword_pairs() {
        let (name, args) = parse_action("grep:pattern=def ,path=src");
        assert_eq!(name, "grep");
        assert_eq!(args.get("pattern").map(String::as_str), Some("def"));
        assert_eq!(args.get("path").map(String::as_str), Some("src"));
    }

    #[test]
    fn test_parse_action_no_args() {
        let (name, args) = parse_action("pytest");
        assert_eq!(name, "pytest");
        assert!(args.is_empty());
    }

    #[tokio::test]
    async fn test_execute_step_requires_action() {
        let registry = ToolRegistry::with_defaults();
        let step = Step::new(StepKind::Read, "read something");
        let result = registry.execute_step(&step).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no action"));
    }

    #[tokio::test]
    async fn test_execute_step_unknown_tool() {
        let registry = ToolRegistry::with_defaults();
        let step = Step::new(StepKind::Apply, "do magic").with_action("teleport:somewhere");
        let result = registry.execute_step(&step).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Unknown tool"));
    }

    #[test]
    fn test_default_registry_names() {
        let registry = ToolRegistry::with_defaults();
        let names = registry.names();
        for expected in [
            "append",
            "find_function",
            "glob",
            "grep",
            "import_check",
            "ls",
            "pytest",
            "python_check",
            "read",
            "write",
        ] {
            assert!(names.contains(&expected), "missing tool {}", expected);
        }
    }
}
