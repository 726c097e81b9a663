//! Code search: grep, glob, and function lookup.

use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;

use crate::error::Result;
use crate::types::ExecutionResult;

use super::{require_arg, Tool, ToolArgs};

const DEFAULT_MAX_MATCHES: usize = 50;

/// Collect candidate files: the path itself, or `**/*` under a directory
/// filtered to the given extensions (empty = all files).
fn collect_files(root: &str, extensions: &[&str]) -> Vec<PathBuf> {
    let root_path = PathBuf::from(root);
    if root_path.is_file() {
        return vec![root_path];
    }

    let pattern = format!("{}/**/*", root.trim_end_matches('/'));
    let mut files = Vec::new();
    if let Ok(paths) = glob::glob(&pattern) {
        for path in paths.flatten() {
            if !path.is_file() {
                continue;
            }
            if extensions.is_empty() {
                files.push(path);
                continue;
            }
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.contains(&e))
                .unwrap_or(false);
            if matches {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

/// `grep:pattern=...,path=...` - regex search across files.
///
/// Optional: `files` (comma list of extensions), `max` (match cap).
#[derive(Default)]
pub struct Grep;

#[async_trait]
impl Tool for Grep {
    fn name(&self) -> &'static str {
        "grep"
    }

    fn validate_args(&self, args: &ToolArgs) -> Option<String> {
        if !args.contains_key("pattern") {
            return Some("grep requires a pattern".to_string());
        }
        None
    }

    async fn execute(&self, args: ToolArgs) -> Result<ExecutionResult> {
        let pattern = require_arg(&args, "pattern", self.name())?;
        let path = args.get("path").map(String::as_str).unwrap_or(".");
        let max: usize = args
            .get("max")
            .and_then(|m| m.parse().ok())
            .unwrap_or(DEFAULT_MAX_MATCHES);
        let extensions: Vec<&str> = args
            .get("files")
            .map(|f| f.split(',').map(str::trim).collect())
            .unwrap_or_default();

        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                return Ok(ExecutionResult::failed(format!(
                    "Invalid pattern '{}': {}",
                    pattern, e
                )))
            }
        };

        let mut matches = Vec::new();
        'files: for file in collect_files(path, &extensions) {
            let Ok(content) = tokio::fs::read_to_string(&file).await else {
                continue;
            };
            for (line_number, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(serde_json::json!({
                        "file": file.to_string_lossy(),
                        "line": line_number + 1,
                        "text": line.trim(),
                    }));
                    if matches.len() >= max {
                        break 'files;
                    }
                }
            }
        }

        Ok(
            ExecutionResult::ok(format!("{} matches for '{}'", matches.len(), pattern))
                .with_data(serde_json::json!({ "matches": matches })),
        )
    }
}

/// `glob:pattern=...,path=...` - file name matching.
#[derive(Default)]
pub struct GlobFiles;

#[async_trait]
impl Tool for GlobFiles {
    fn name(&self) -> &'static str {
        "glob"
    }

    async fn execute(&self, args: ToolArgs) -> Result<ExecutionResult> {
        let pattern = require_arg(&args, "pattern", self.name())?;
        let path = args.get("path").map(String::as_str).unwrap_or(".");
        let max: usize = args
            .get("max")
            .and_then(|m| m.parse().ok())
            .unwrap_or(DEFAULT_MAX_MATCHES);

        let full_pattern = format!("{}/{}", path.trim_end_matches('/'), pattern);
        let mut files: Vec<String> = match glob::glob(&full_pattern) {
            Ok(paths) => paths
                .flatten()
                .take(max)
                .map(|p| p.to_string_lossy().to_string())
                .collect(),
            Err(e) => {
                return Ok(ExecutionResult::failed(format!(
                    "Invalid glob '{}': {}",
                    full_pattern, e
                )))
            }
        };
        files.sort();

        Ok(
            ExecutionResult::ok(format!("{} files match {}", files.len(), pattern))
                .with_data(serde_json::json!({ "files": files })),
        )
    }
}

/// `find_function:name=...,path=...` - locate a function definition.
pub struct FindFunction;

#[async_trait]
impl Tool for FindFunction {
    fn name(&self) -> &'static str {
        "find_function"
    }

    async fn execute(&self, args: ToolArgs) -> Result<ExecutionResult> {
        let name = require_arg(&args, "name", self.name())?;
        let path = args.get("path").map(String::as_str).unwrap_or(".");

        let pattern = format!(
            r"(?:def|function|fn)\s+{}\s*\(",
            regex::escape(name)
        );
        let mut grep_args = ToolArgs::new();
        grep_args.insert("pattern".to_string(), pattern);
        grep_args.insert("path".to_string(), path.to_string());
        grep_args.insert("files".to_string(), "py,ts,js,rs".to_string());

        let result = Grep.execute(grep_args).await?;
        if !result.success {
            return Ok(result);
        }

        let matches = result
            .data
            .as_ref()
            .and_then(|d| d["matches"].as_array())
            .map(|m| m.len())
            .unwrap_or(0);

        if matches == 0 {
            Ok(ExecutionResult::failed(format!(
                "Function '{}' not found under {}",
                name, path
            )))
        } else {
            Ok(ExecutionResult::ok(format!(
                "Found {} definition(s) of '{}'",
                matches, name
            ))
            .with_data(result.data.unwrap_or_default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &std::path::Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn test_grep_finds_matches_with_line_numbers() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "x = 1\ndef handler(event):\n    pass\n");
        write(dir.path(), "b.py", "def other():\n    pass\n");

        let mut args = ToolArgs::new();
        args.insert("pattern".to_string(), r"def \w+".to_string());
        args.insert("path".to_string(), dir.path().to_string_lossy().to_string());

        let result = Grep.execute(args).await.unwrap();
        assert!(result.success);
        let matches = result.data.unwrap()["matches"].as_array().unwrap().clone();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0]["line"], 2);
    }

    #[tokio::test]
    async fn test_grep_extension_filter() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "needle\n");
        write(dir.path(), "b.txt", "needle\n");

        let mut args = ToolArgs::new();
        args.insert("pattern".to_string(), "needle".to_string());
        args.insert("path".to_string(), dir.path().to_string_lossy().to_string());
        args.insert("files".to_string(), "py".to_string());

        let result = Grep.execute(args).await.unwrap();
        assert_eq!(result.data.unwrap()["matches"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_grep_bad_pattern_fails_cleanly() {
        let mut args = ToolArgs::new();
        args.insert("pattern".to_string(), "[unclosed".to_string());
        let result = Grep.execute(args).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_glob_matches() {
        let dir = tempdir().unwrap();
        write(dir.path(), "one.py", "");
        write(dir.path(), "two.py", "");
        write(dir.path(), "three.rs", "");

        let mut args = ToolArgs::new();
        args.insert("pattern".to_string(), "*.py".to_string());
        args.insert("path".to_string(), dir.path().to_string_lossy().to_string());

        let result = GlobFiles.execute(args).await.unwrap();
        let files = result.data.unwrap()["files"].as_array().unwrap().len();
        assert_eq!(files, 2);
    }

    #[tokio::test]
    async fn test_find_function() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "auth.py",
            "def validate_token(token):\n    return bool(token)\n",
        );

        let mut args = ToolArgs::new();
        args.insert("name".to_string(), "validate_token".to_string());
        args.insert("path".to_string(), dir.path().to_string_lossy().to_string());

        let result = FindFunction.execute(args).await.unwrap();
        assert!(result.success);
        assert!(result.output.contains("validate_token"));

        let mut args = ToolArgs::new();
        args.insert("name".to_string(), "missing_function".to_string());
        args.insert("path".to_string(), dir.path().to_string_lossy().to_string());
        let result = FindFunction.execute(args).await.unwrap();
        assert!(!result.success);
    }
}
