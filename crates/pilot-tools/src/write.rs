//! File creation tool

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::confirm::NeedsConfirmation;
use crate::path::{atomic_write, validate_path};
use crate::registry::{parse_input, Tool, ToolError, ToolOutcome};

/// Tool for creating or overwriting files. Defers the write behind a
/// confirmation carrying the old/new content pair.
pub struct WriteTool {
    work_dir: PathBuf,
}

impl WriteTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[derive(Deserialize)]
struct WriteInput {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content. Creates parent directories if needed. User confirmation required. ALWAYS prefer editing existing files over writing new ones — use the edit tool to modify existing files. Never proactively create documentation files (*.md) or README files unless explicitly requested."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path to write"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, raw_args: &str, _cancel: CancellationToken) -> ToolOutcome {
        let params: WriteInput = parse_input(raw_args)?;
        if params.path.is_empty() {
            return Err(ToolError::msg("path is required"));
        }
        if params.content.is_empty() {
            return Err(ToolError::msg("content is required"));
        }

        let abs_path = validate_path(&self.work_dir, &params.path)?;

        // Existing content, for the diff preview; empty for new files.
        let old_content = tokio::fs::read_to_string(&abs_path)
            .await
            .unwrap_or_default();

        let path = params.path;
        let content = params.content;
        Err(NeedsConfirmation::new(
            "write",
            path.clone(),
            old_content,
            content.clone(),
            move || {
                Box::pin(async move {
                    if let Some(parent) = abs_path.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| format!("create directory: {}", e))?;
                    }
                    atomic_write(&abs_path, content.as_bytes(), 0o644)
                        .map_err(|e| format!("write file: {}", e))?;
                    Ok(format!(
                        "Successfully wrote {} ({} bytes)",
                        path,
                        content.len()
                    ))
                })
            },
        )
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_confirmation_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteTool::new(dir.path().to_path_buf());
        let args = json!({ "path": "new.txt", "content": "hello" }).to_string();

        let err = tool.execute(&args, CancellationToken::new()).await.unwrap_err();
        let ToolError::Confirmation(confirm) = err else {
            panic!("expected confirmation");
        };
        assert_eq!(confirm.tool, "write");
        assert_eq!(confirm.preview, "");
        assert_eq!(confirm.new_content, "hello");
        // Nothing touched disk yet.
        assert!(!dir.path().join("new.txt").exists());

        let result = confirm.execute().await.unwrap();
        assert!(result.contains("Successfully wrote new.txt (5 bytes)"));
        assert_eq!(std::fs::read_to_string(dir.path().join("new.txt")).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_existing_content_becomes_preview() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "old stuff").unwrap();
        let tool = WriteTool::new(dir.path().to_path_buf());
        let args = json!({ "path": "a.txt", "content": "new stuff" }).to_string();

        let err = tool.execute(&args, CancellationToken::new()).await.unwrap_err();
        let ToolError::Confirmation(confirm) = err else {
            panic!("expected confirmation");
        };
        assert_eq!(confirm.preview, "old stuff");
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteTool::new(dir.path().to_path_buf());
        let args = json!({ "path": "deep/nested/f.txt", "content": "x" }).to_string();

        let err = tool.execute(&args, CancellationToken::new()).await.unwrap_err();
        let ToolError::Confirmation(confirm) = err else {
            panic!("expected confirmation");
        };
        confirm.execute().await.unwrap();
        assert!(dir.path().join("deep/nested/f.txt").exists());
    }

    #[tokio::test]
    async fn test_escape_rejected_before_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteTool::new(dir.path().to_path_buf());
        let args = json!({ "path": "../evil.txt", "content": "x" }).to_string();

        let err = tool.execute(&args, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::Recoverable(_)));
    }
}
