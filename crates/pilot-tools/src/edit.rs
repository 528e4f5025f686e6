//! Exact-match file editing tool

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::confirm::NeedsConfirmation;
use crate::path::{atomic_write, validate_path};
use crate::registry::{parse_input, Tool, ToolError, ToolOutcome};

/// Tool for replacing an exact string match in a file. The old string must
/// appear exactly once; the write is deferred behind a confirmation.
pub struct EditTool {
    work_dir: PathBuf,
}

impl EditTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[derive(Deserialize)]
struct EditInput {
    path: String,
    old_str: String,
    new_str: String,
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing an exact string match. The old_str must appear exactly once in the file. When editing text from read tool output, preserve the exact indentation (tabs/spaces) as shown in the file content — do not include line numbers from the read output. If the edit fails because old_str is not unique, include more surrounding context lines to make it unique. Always prefer editing existing files over creating new ones."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path to edit"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact string to find (must appear exactly once)"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement string"
                }
            },
            "required": ["path", "old_str", "new_str"]
        })
    }

    async fn execute(&self, raw_args: &str, _cancel: CancellationToken) -> ToolOutcome {
        let params: EditInput = parse_input(raw_args)?;
        if params.path.is_empty() {
            return Err(ToolError::msg("path is required"));
        }
        if params.old_str.is_empty() {
            return Err(ToolError::msg("old_str is required"));
        }

        let abs_path = validate_path(&self.work_dir, &params.path)?;
        let content = tokio::fs::read_to_string(&abs_path)
            .await
            .map_err(|e| ToolError::msg(format!("read file: {}", e)))?;

        let count = content.matches(&params.old_str).count();
        if count == 0 {
            return Err(ToolError::msg(format!(
                "no match found for old_str in {}. Check for exact whitespace and indentation",
                params.path
            )));
        }
        if count > 1 {
            return Err(ToolError::msg(duplicate_match_error(
                &content,
                &params.old_str,
                &params.path,
                count,
            )));
        }

        let new_content = content.replacen(&params.old_str, &params.new_str, 1);

        let path = params.path;
        Err(NeedsConfirmation::new(
            "edit",
            path.clone(),
            content,
            new_content.clone(),
            move || {
                Box::pin(async move {
                    let mode = file_mode(&abs_path)
                        .map_err(|e| format!("stat file: {}", e))?;
                    atomic_write(&abs_path, new_content.as_bytes(), mode)
                        .map_err(|e| format!("write file: {}", e))?;
                    Ok(format!("Successfully edited {}", path))
                })
            },
        )
        .into())
    }
}

/// Diagnostic for a non-unique match, listing the line of each occurrence
/// of old_str's first line so the model can add context.
fn duplicate_match_error(content: &str, old_str: &str, path: &str, count: usize) -> String {
    let first_line = old_str.lines().next().unwrap_or_default();
    let locations: Vec<String> = content
        .lines()
        .enumerate()
        .filter(|(_, line)| line.contains(first_line))
        .map(|(i, _)| format!("line {}", i + 1))
        .collect();
    format!(
        "old_str matches {} times in {} (at {}). Include more surrounding context to make the match unique",
        count,
        path,
        locations.join(", ")
    )
}

#[cfg(unix)]
fn file_mode(path: &std::path::Path) -> std::io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(std::fs::metadata(path)?.permissions().mode())
}

#[cfg(not(unix))]
fn file_mode(_path: &std::path::Path) -> std::io::Result<u32> {
    Ok(0o644)
}
