//! Directory listing tool

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::path::validate_path;
use crate::registry::{parse_input, Tool, ToolError, ToolOutcome};

/// Tool for listing directory contents
pub struct LsTool {
    work_dir: PathBuf,
}

impl LsTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[derive(Deserialize)]
struct LsInput {
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List directory contents with file/directory indicators and sizes. Can only list directories, not files. Use glob to find files by pattern."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path to list (default: working directory)"
                }
            }
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, raw_args: &str, _cancel: CancellationToken) -> ToolOutcome {
        let params: LsInput = parse_input(raw_args)?;

        let dir = match params.path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => validate_path(&self.work_dir, path)?,
            None => self.work_dir.clone(),
        };

        let entries = std::fs::read_dir(&dir)
            .map_err(|e| ToolError::msg(format!("read directory: {}", e)))?;

        let mut out = String::new();
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if meta.is_dir() {
                out.push_str(&format!("  {}/\n", name));
            } else {
                out.push_str(&format!("  {:<40} {}\n", name, format_size(meta.len())));
            }
        }

        if out.is_empty() {
            return Ok("Directory is empty.".to_string());
        }
        Ok(out)
    }
}

fn format_size(bytes: u64) -> String {
    match bytes {
        b if b >= 1 << 20 => format!("{:.1}MB", b as f64 / (1 << 20) as f64),
        b if b >= 1 << 10 => format!("{:.1}KB", b as f64 / (1 << 10) as f64),
        b => format!("{}B", b),
    }
}
