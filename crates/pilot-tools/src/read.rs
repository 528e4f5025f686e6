//! File reading tool

use std::fmt::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::path::validate_path;
use crate::registry::{parse_input, Tool, ToolError, ToolOutcome};

/// Cap applied when no end_line is given
const MAX_LINES: usize = 500;

/// Tool for reading file contents with line numbers
pub struct ReadTool {
    work_dir: PathBuf,
}

impl ReadTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[derive(Deserialize)]
struct ReadInput {
    path: String,
    #[serde(default)]
    start_line: Option<usize>,
    #[serde(default)]
    end_line: Option<usize>,
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read file contents with line numbers (cat -n format, 1-indexed). Use start_line/end_line for large files to read specific sections. Can only read files, not directories — use ls for directories. Read multiple files in parallel when you need to understand several files at once. Always use this tool instead of bash cat, head, or tail."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path to read"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to read (1-indexed, default: 1)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to read (1-indexed, inclusive)"
                }
            },
            "required": ["path"]
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, raw_args: &str, _cancel: CancellationToken) -> ToolOutcome {
        let params: ReadInput = parse_input(raw_args)?;
        if params.path.is_empty() {
            return Err(ToolError::msg("path is required"));
        }

        let abs_path = validate_path(&self.work_dir, &params.path)?;
        let bytes = tokio::fs::read(&abs_path)
            .await
            .map_err(|e| ToolError::msg(format!("open file: {}", e)))?;
        let content = String::from_utf8_lossy(&bytes);

        let start_line = params.start_line.filter(|&n| n > 0).unwrap_or(1);
        let end_line = params.end_line.filter(|&n| n > 0);

        let total_lines = content.lines().count();
        let mut out = String::new();
        let mut shown = 0usize;
        let mut capped = false;

        for (idx, line) in content.lines().enumerate() {
            let line_num = idx + 1;
            if line_num < start_line {
                continue;
            }
            if let Some(end) = end_line {
                if line_num > end {
                    break;
                }
            } else if shown >= MAX_LINES {
                capped = true;
                break;
            }
            let _ = writeln!(out, "{:>4} │ {}", line_num, line);
            shown += 1;
        }

        if capped {
            let _ = write!(
                out,
                "\n... (file has {} total lines, showing lines {}-{}. Use start_line/end_line to read more.)",
                total_lines,
                start_line,
                start_line + MAX_LINES - 1
            );
        }

        if out.is_empty() {
            return Ok("File is empty.".to_string());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run_read(dir: &std::path::Path, args: serde_json::Value) -> ToolOutcome {
        let tool = ReadTool::new(dir.to_path_buf());
        tool.execute(&args.to_string(), CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_line_numbering() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "alpha\nbeta\n").unwrap();
        let out = run_read(dir.path(), json!({ "path": "f.txt" })).await.unwrap();
        assert!(out.contains("   1 │ alpha"));
        assert!(out.contains("   2 │ beta"));
    }

    #[tokio::test]
    async fn test_line_range_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "l1\nl2\nl3\nl4\n").unwrap();
        let out = run_read(
            dir.path(),
            json!({ "path": "f.txt", "start_line": 2, "end_line": 3 }),
        )
        .await
        .unwrap();
        assert!(!out.contains("l1"));
        assert!(out.contains("   2 │ l2"));
        assert!(out.contains("   3 │ l3"));
        assert!(!out.contains("l4"));
    }

    #[tokio::test]
    async fn test_unbounded_read_caps_at_500() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (1..=600).map(|i| format!("line {}\n", i)).collect();
        std::fs::write(dir.path().join("big.txt"), body).unwrap();
        let out = run_read(dir.path(), json!({ "path": "big.txt" })).await.unwrap();
        assert!(out.contains(" 500 │ line 500"));
        assert!(!out.contains(" 501 │"));
        assert!(out.contains("file has 600 total lines, showing lines 1-500"));
    }

    #[tokio::test]
    async fn test_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.txt"), "").unwrap();
        let out = run_read(dir.path(), json!({ "path": "empty.txt" })).await.unwrap();
        assert_eq!(out, "File is empty.");
    }

    #[tokio::test]
    async fn test_missing_file_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_read(dir.path(), json!({ "path": "nope.txt" }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("open file"));
    }

    #[tokio::test]
    async fn test_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_read(dir.path(), json!({ "path": "../outside.txt" }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("outside the working directory"));
    }
}
