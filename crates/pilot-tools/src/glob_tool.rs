//! Glob file pattern matching tool

use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::registry::{parse_input, Tool, ToolError, ToolOutcome};
use crate::walk::walk_files;

const MAX_RESULTS: usize = 100;

/// Tool for finding files matching a glob pattern
pub struct GlobTool {
    work_dir: PathBuf,
}

impl GlobTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[derive(Deserialize)]
struct GlobInput {
    pattern: String,
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        r#"Fast file pattern matching tool. Supports glob patterns like "**/*.rs" or "src/**/*.ts". Returns matching file paths relative to working directory, sorted by modification time. Use this tool when you need to find files by name patterns. Prefer this over bash find or ls commands."#
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern to match files (e.g., '**/*.rs', 'src/**/*.ts')"
                }
            },
            "required": ["pattern"]
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, raw_args: &str, cancel: CancellationToken) -> ToolOutcome {
        let params: GlobInput = parse_input(raw_args)?;
        if params.pattern.is_empty() {
            return Err(ToolError::msg("pattern is required"));
        }

        let pattern = glob::Pattern::new(&params.pattern)
            .map_err(|e| ToolError::msg(format!("invalid glob pattern: {}", e)))?;
        let options = glob::MatchOptions {
            require_literal_separator: true,
            ..Default::default()
        };

        let mut matches: Vec<(String, SystemTime)> = Vec::new();
        for path in walk_files(&self.work_dir, &cancel) {
            let Ok(rel) = path.strip_prefix(&self.work_dir) else {
                continue;
            };
            let rel = rel.to_string_lossy().replace('\\', "/");
            if pattern.matches_with(&rel, options) {
                let mtime = std::fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                matches.push((rel, mtime));
            }
        }
        if cancel.is_cancelled() {
            return Err(ToolError::msg("operation cancelled"));
        }

        if matches.is_empty() {
            return Ok("No files matched the pattern.".to_string());
        }

        matches.sort_by(|a, b| b.1.cmp(&a.1));

        let total = matches.len();
        let mut out = String::new();
        for (rel, _) in matches.iter().take(MAX_RESULTS) {
            out.push_str(rel);
            out.push('\n');
        }
        if total > MAX_RESULTS {
            out.push_str(&format!("\n... and {} more matches", total - MAX_RESULTS));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run_glob(dir: &std::path::Path, pattern: &str) -> ToolOutcome {
        let tool = GlobTool::new(dir.to_path_buf());
        let args = serde_json::to_string(&json!({ "pattern": pattern })).unwrap();
        tool.execute(&args, CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_recursive_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/nested/b.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/c.txt"), "").unwrap();

        let out = run_glob(dir.path(), "**/*.rs").await.unwrap();
        assert!(out.contains("src/a.rs"));
        assert!(out.contains("src/nested/b.rs"));
        assert!(!out.contains("c.txt"));
    }

    #[tokio::test]
    async fn test_single_star_does_not_cross_separators() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("top.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/deep.rs"), "").unwrap();

        let out = run_glob(dir.path(), "*.rs").await.unwrap();
        assert!(out.contains("top.rs"));
        assert!(!out.contains("deep.rs"));
    }

    #[tokio::test]
    async fn test_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_glob(dir.path(), "*.zig").await.unwrap();
        assert_eq!(out, "No files matched the pattern.");
    }

    #[tokio::test]
    async fn test_result_cap() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..120 {
            std::fs::write(dir.path().join(format!("f{:03}.rs", i)), "").unwrap();
        }
        let out = run_glob(dir.path(), "*.rs").await.unwrap();
        assert!(out.contains("... and 20 more matches"));
        assert_eq!(out.lines().filter(|l| l.ends_with(".rs")).count(), 100);
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_glob(dir.path(), "[").await.unwrap_err();
        assert!(err.to_string().contains("invalid glob pattern"));
    }
}
