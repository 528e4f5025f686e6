//! Shell command execution tool

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::confirm::NeedsConfirmation;
use crate::registry::{parse_input, Tool, ToolError, ToolOutcome};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 120;
const MAX_OUTPUT_CHARS: usize = 10_000;

/// Tool for executing shell commands in the working directory. Every
/// invocation is deferred behind a confirmation.
pub struct BashTool {
    work_dir: PathBuf,
}

impl BashTool {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }
}

#[derive(Deserialize)]
struct BashInput {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        r#"Execute a shell command in the working directory. Use for terminal operations like git, builds, tests, and other system commands. Do NOT use bash for file operations (reading, writing, editing, searching) — use the dedicated tools instead. Specifically, do not use cat, head, tail, sed, awk, find, grep, or echo when a dedicated tool exists.

Before executing commands that create new directories or files, first verify the parent directory exists using ls. Always quote file paths containing spaces. Use && to chain sequential dependent commands. Prefer absolute paths and avoid cd when possible.

All commands require user confirmation. Default timeout: 30s, max: 120s. Output is truncated at 10,000 characters.

Git safety: Never force-push, reset --hard, use --no-verify, or amend unless the user explicitly asks. Never use interactive flags (-i). Prefer staging specific files over "git add -A". Only commit when explicitly requested by the user."#
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 30, max: 120)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, raw_args: &str, cancel: CancellationToken) -> ToolOutcome {
        let params: BashInput = parse_input(raw_args)?;
        if params.command.is_empty() {
            return Err(ToolError::msg("command is required"));
        }

        let timeout = params
            .timeout
            .filter(|&t| t > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        let command = params.command;
        let work_dir = self.work_dir.clone();
        Err(NeedsConfirmation::new(
            "bash",
            command.clone(),
            command.clone(),
            String::new(),
            move || Box::pin(run_command(command, work_dir, timeout, cancel)),
        )
        .into())
    }
}

/// Run the command with merged stdout/stderr, honoring cancellation and the
/// per-invocation timeout. Failures become result strings the model sees.
async fn run_command(
    command: String,
    work_dir: PathBuf,
    timeout_secs: u64,
    cancel: CancellationToken,
) -> Result<String, String> {
    let (shell, shell_arg) = if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    };

    let mut child = Command::new(shell)
        .arg(shell_arg)
        .arg(&command)
        .current_dir(&work_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("spawn command: {}", e))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut stdout_lines = stdout.map(|s| BufReader::new(s).lines());
    let mut stderr_lines = stderr.map(|s| BufReader::new(s).lines());

    let mut output = String::new();
    let mut truncated = false;
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(timeout_secs);

    let append = |line: String, output: &mut String, truncated: &mut bool| {
        if *truncated {
            return;
        }
        if output.len() + line.len() > MAX_OUTPUT_CHARS {
            let remaining = MAX_OUTPUT_CHARS.saturating_sub(output.len());
            output.extend(line.chars().take(remaining));
            *truncated = true;
            return;
        }
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&line);
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Ok("Command cancelled.".to_string());
            }
            _ = tokio::time::sleep_until(deadline) => {
                let _ = child.kill().await;
                return Ok(format!("Command timed out after {}s.\n{}", timeout_secs, output));
            }
            line = read_next(&mut stdout_lines) => {
                if let Some(line) = line {
                    append(line, &mut output, &mut truncated);
                }
            }
            line = read_next(&mut stderr_lines) => {
                if let Some(line) = line {
                    append(line, &mut output, &mut truncated);
                }
            }
            status = child.wait() => {
                let status = status.map_err(|e| format!("wait for command: {}", e))?;

                // Drain whatever the pipes still hold.
                while stdout_lines.is_some() {
                    let Some(line) = read_next(&mut stdout_lines).await else {
                        break;
                    };
                    append(line, &mut output, &mut truncated);
                }
                while stderr_lines.is_some() {
                    let Some(line) = read_next(&mut stderr_lines).await else {
                        break;
                    };
                    append(line, &mut output, &mut truncated);
                }

                let mut result = if status.success() {
                    if output.is_empty() {
                        "(no output)".to_string()
                    } else {
                        output
                    }
                } else {
                    let code = status.code().unwrap_or(-1);
                    format!("Exit code: {}\n{}", code, output)
                };
                if truncated {
                    result.push_str("\n[output truncated]");
                }
                return Ok(result);
            }
        }
    }
}

/// Next line from an optional pipe reader. A reader that reaches EOF is
/// dropped; an absent reader pends forever so it never wins a select.
async fn read_next<R>(lines: &mut Option<tokio::io::Lines<R>>) -> Option<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match lines {
        Some(reader) => match reader.next_line().await.ok().flatten() {
            Some(line) => Some(line),
            None => {
                *lines = None;
                None
            }
        },
        None => std::future::pending().await,
    }
}
