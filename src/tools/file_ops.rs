//! File operations: read, write, append, list.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::types::ExecutionResult;

use super::{require_arg, Tool, ToolArgs};

/// `read:path` - read a file.
pub struct ReadFile;

#[async_trait]
impl Tool for ReadFile {
    fn name(&self) -> &'static str {
        "read"
    }

    fn validate_args(&self, args: &ToolArgs) -> Option<String> {
        if args.contains_key("path") {
            None
        } else {
            Some("read requires a path".to_string())
        }
    }

    async fn execute(&self, args: ToolArgs) -> Result<ExecutionResult> {
        let path = require_arg(&args, "path", self.name())?;

        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let lines = content.lines().count();
                Ok(ExecutionResult::ok(format!("Read {} ({} lines)", path, lines))
                    .with_data(serde_json::json!({ "content": content, "lines": lines })))
            }
            Err(e) => Ok(ExecutionResult::failed(format!(
                "Cannot read {}: {}",
                path, e
            ))),
        }
    }
}

/// `write:path=...,content=...` - write a file, optionally creating parent
/// directories (`create_dirs=true`).
pub struct WriteFile;

#[async_trait]
impl Tool for WriteFile {
    fn name(&self) -> &'static str {
        "write"
    }

    fn validate_args(&self, args: &ToolArgs) -> Option<String> {
        if !args.contains_key("path") {
            return Some("write requires a path".to_string());
        }
        None
    }

    async fn execute(&self, args: ToolArgs) -> Result<ExecutionResult> {
        let path = require_arg(&args, "path", self.name())?;
        let content = args.get("content").map(String::as_str).unwrap_or("");
        let create_dirs = args
            .get("create_dirs")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        if create_dirs {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        match tokio::fs::write(path, content).await {
            Ok(()) => Ok(ExecutionResult::ok(format!(
                "Wrote {} ({} bytes)",
                path,
                content.len()
            ))),
            Err(e) => Ok(ExecutionResult::failed(format!(
                "Cannot write {}: {}",
                path, e
            ))),
        }
    }
}

/// `append:path=...,content=...` - append to a file.
pub struct AppendFile;

#[async_trait]
impl Tool for AppendFile {
    fn name(&self) -> &'static str {
        "append"
    }

    async fn execute(&self, args: ToolArgs) -> Result<ExecutionResult> {
        let path = require_arg(&args, "path", self.name())?;
        let content = args.get("content").map(String::as_str).unwrap_or("");

        let existing = tokio::fs::read_to_string(path).await.unwrap_or_default();
        let combined = format!("{}{}", existing, content);

        match tokio::fs::write(path, &combined).await {
            Ok(()) => Ok(ExecutionResult::ok(format!(
                "Appended {} bytes to {}",
                content.len(),
                path
            ))),
            Err(e) => Ok(ExecutionResult::failed(format!(
                "Cannot append to {}: {}",
                path, e
            ))),
        }
    }
}

/// `ls:path` or `ls:path=...,pattern=*.py` - list directory entries.
pub struct ListDir;

#[async_trait]
impl Tool for ListDir {
    fn name(&self) -> &'static str {
        "ls"
    }

    async fn execute(&self, args: ToolArgs) -> Result<ExecutionResult> {
        let path = args.get("path").map(String::as_str).unwrap_or(".");
        let pattern = args.get("pattern").map(String::as_str);

        let mut entries = Vec::new();
        let mut reader = match tokio::fs::read_dir(path).await {
            Ok(reader) => reader,
            Err(e) => {
                return Ok(ExecutionResult::failed(format!(
                    "Cannot list {}: {}",
                    path, e
                )))
            }
        };

        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(pattern) = pattern {
                let matches = glob::Pattern::new(pattern)
                    .map(|p| p.matches(&name))
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }
            entries.push(name);
        }
        entries.sort();

        Ok(
            ExecutionResult::ok(format!("{} entries in {}", entries.len(), path))
                .with_data(serde_json::json!({ "entries": entries })),
        )
    }
}
