//! Content search tool

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::path::validate_path;
use crate::registry::{parse_input, Tool, ToolError, ToolOutcome};
use crate::walk::walk_files;

const MAX_RESULTS: usize = 50;
const MAX_LINE_CHARS: usize = 200;
const BINARY_SNIFF_BYTES: usize = 512;

/// Tool for searching file contents with a regex
pub struct GrepTool {
    work_dir: PathBuf,
}

impl GrepTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[derive(Deserialize)]
struct GrepInput {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    include: Option<String>,
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        r#"Search file contents using RE2 regex. Returns matching lines with file paths and line numbers. ALWAYS use this tool for content search — never use bash grep or rg. Supports RE2 regex syntax (e.g., "log.*Error", "fn\s+\w+"). Note: RE2 does not support lookaheads or lookbehinds. Literal braces need escaping (use "interface\{\}" to find "interface{}" in Go code). Filter files with the include parameter using glob patterns (e.g., "*.rs", "*.{ts,tsx}")."#
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "RE2 regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in (default: working directory)"
                },
                "include": {
                    "type": "string",
                    "description": "Glob pattern to filter filenames (e.g., '*.rs', '*.{ts,tsx}')"
                }
            },
            "required": ["pattern"]
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, raw_args: &str, cancel: CancellationToken) -> ToolOutcome {
        let params: GrepInput = parse_input(raw_args)?;
        if params.pattern.is_empty() {
            return Err(ToolError::msg("pattern is required"));
        }

        let re = regex::Regex::new(&params.pattern)
            .map_err(|e| ToolError::msg(format!("invalid regex (RE2 syntax): {}", e)))?;

        let search_dir = match params.path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => validate_path(&self.work_dir, path)?,
            None => self.work_dir.clone(),
        };

        let include = params
            .include
            .as_deref()
            .filter(|p| !p.is_empty())
            .and_then(|p| glob::Pattern::new(p).ok());

        let mut results: Vec<String> = Vec::new();
        let mut total_matches = 0usize;

        for path in walk_files(&search_dir, &cancel) {
            if let Some(ref include) = include {
                let name = path.file_name().map(|n| n.to_string_lossy());
                if !name.map(|n| include.matches(&n)).unwrap_or(false) {
                    continue;
                }
            }
            if is_binary_file(&path) {
                continue;
            }
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            let content = String::from_utf8_lossy(&bytes);

            let rel = path
                .strip_prefix(&self.work_dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");

            for (line_idx, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    total_matches += 1;
                    if results.len() < MAX_RESULTS {
                        results.push(format!(
                            "{}:{}: {}",
                            rel,
                            line_idx + 1,
                            truncate_line(line, MAX_LINE_CHARS)
                        ));
                    }
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(ToolError::msg("operation cancelled"));
        }

        if results.is_empty() {
            return Ok("No matches found.".to_string());
        }

        let mut out = results.join("\n");
        out.push('\n');
        if total_matches > MAX_RESULTS {
            out.push_str(&format!(
                "\n... and {} more matches",
                total_matches - MAX_RESULTS
            ));
        }

        Ok(out)
    }
}

fn truncate_line(line: &str, max_chars: usize) -> String {
    let mut chars = line.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// A file is treated as binary when its first 512 bytes contain a NUL.
fn is_binary_file(path: &std::path::Path) -> bool {
    use std::io::Read;
    let Ok(mut file) = std::fs::File::open(path) else {
        return true;
    };
    let mut buf = [0u8; BINARY_SNIFF_BYTES];
    let Ok(n) = file.read(&mut buf) else {
        return true;
    };
    buf[..n].contains(&0)
}
