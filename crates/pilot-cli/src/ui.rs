//! Terminal rendering and the raw-mode interrupt listener

use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossterm::event::{Event, KeyCode, KeyModifiers};
use crossterm::style::Stylize;
use crossterm::terminal;
use pilot_agent::{CheckpointItem, ContextStats, Interrupter, NoopInterrupter, SessionMeta, Ui};
use similar::{ChangeTag, TextDiff};
use tokio_util::sync::CancellationToken;

const MAX_DIFF_LINES: usize = 200;

/// Concrete terminal UI for the REPL
pub struct Terminal;

impl Terminal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    pub fn print_prompt(&self) {
        print!("{} ", ">".cyan().bold());
        std::io::stdout().flush().ok();
    }

    pub fn print_banner(&self, model: &str, work_dir: &str, version: &str) {
        println!("{} {}", "pilot".cyan().bold(), version.to_string().dim());
        println!("{} {}", "model:".dim(), model);
        println!("{} {}", "cwd:  ".dim(), work_dir);
        println!("Type a request, or /help for commands. Esc cancels a running turn.");
        println!();
    }

    pub fn print_help(&self) {
        println!("Commands:");
        println!("  /help      show this help");
        println!("  /model     switch the active model");
        println!("  /compact   summarize the conversation to free context");
        println!("  /clear     reset the conversation");
        println!("  /context   show context window usage");
        println!("  /tasks     show the task list");
        println!("  /resume    resume a saved session");
        println!("  /rewind    rewind code and/or conversation to a checkpoint");
        println!("  /quit      exit");
        println!();
        println!("Esc cancels the current turn. Ctrl+C twice exits.");
    }

    pub fn print_error(&self, err: &dyn std::fmt::Display) {
        eprintln!("{} {}", "Error:".red().bold(), err);
    }

    pub fn print_context_usage(&self, stats: &ContextStats) {
        let pct = if stats.context_window > 0 {
            stats.total_tokens as f64 / stats.context_window as f64 * 100.0
        } else {
            0.0
        };
        println!(
            "Context: {} / {} tokens ({:.1}%), compaction above {}",
            stats.total_tokens, stats.context_window, pct, stats.threshold
        );
        println!("  messages:    {} ({} tokens est.)", stats.message_count, stats.message_tokens);
        println!("  system:      {} tokens est.", stats.system_tokens);
        println!("  tool defs:   {} tokens est.", stats.tool_def_tokens);
        if stats.actual_tokens > 0 {
            println!("  api-reported: {} tokens", stats.actual_tokens);
        } else {
            println!("  api-reported: none yet (using estimates)");
        }
    }

    pub fn print_session_list(&self, sessions: &[SessionMeta]) {
        println!("Saved sessions:");
        for (i, meta) in sessions.iter().enumerate() {
            println!(
                "  {}. {}  {}  ({} msgs)  {}",
                i + 1,
                meta.id,
                format_timestamp(meta.updated_at),
                meta.msg_count,
                truncate(&meta.preview, 40).dim()
            );
        }
    }

    pub fn print_session_resumed(&self, msg_count: usize, preview: &str) {
        println!(
            "Resumed session ({} messages): {}",
            msg_count,
            truncate(preview, 60)
        );
    }

    pub fn print_checkpoint_list(&self, items: &[CheckpointItem]) {
        println!("Checkpoints:");
        for item in items {
            println!(
                "  {}. {}  {}",
                item.turn,
                format_timestamp(item.timestamp),
                truncate(&item.preview, 60)
            );
        }
    }

    pub fn print_rewind_actions(&self) {
        println!("Actions:");
        println!("  1. Restore code and conversation");
        println!("  2. Restore conversation only");
        println!("  3. Restore code only");
        println!("  4. Summarize from checkpoint");
        println!("  5. Never mind");
    }

    pub fn print_conversation_history(&self, messages: &[pilot_ai::Message]) {
        for msg in messages {
            match msg.role {
                pilot_ai::Role::User => {
                    println!("{} {}", ">".cyan().bold(), truncate(msg.content_str(), 200));
                }
                pilot_ai::Role::Assistant => {
                    let text = msg.content_str();
                    if !text.is_empty() {
                        println!("{}", truncate(text, 400));
                    }
                    for call in &msg.tool_calls {
                        println!("{}", format!("[{}]", call.name).dim());
                    }
                }
                _ => {}
            }
        }
        println!();
    }

    pub fn print_model_switch(&self, model: &str) {
        println!("Switched to {}.", model);
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

fn truncate(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    let mut chars = flat.chars();
    let out: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", out)
    } else {
        out
    }
}

#[async_trait]
impl Ui for Terminal {
    fn start_interrupt_listener(
        &self,
        parent: CancellationToken,
    ) -> (CancellationToken, Box<dyn Interrupter>) {
        match EscListener::start(parent.clone()) {
            Some((token, listener)) => (token, Box::new(listener)),
            // No TTY or raw mode unavailable; the parent token still works.
            None => (parent.child_token(), Box::new(NoopInterrupter)),
        }
    }

    fn print_spinner(&self) {
        print!("{}", "thinking...".dim());
        std::io::stdout().flush().ok();
    }

    fn clear_spinner(&self) {
        print!("\r\x1b[2K");
        std::io::stdout().flush().ok();
    }

    fn print_assistant(&self, text: &str) {
        print!("{}", text);
        std::io::stdout().flush().ok();
    }

    fn print_assistant_done(&self) {
        println!();
    }

    fn print_warning(&self, msg: &str) {
        println!("{}", msg.yellow());
    }

    fn print_tool_call(&self, name: &str, args: &str) {
        println!("{} {}{}", "→".cyan(), name.cyan().bold(), truncate(args, 120).dim());
    }

    fn print_tool_result(&self, result: &str) {
        let first_line = result.lines().next().unwrap_or_default();
        println!("  {}", truncate(first_line, 100).dim());
    }

    fn print_subagent_tool_call(&self, name: &str, args: &str) {
        println!("  {} {}{}", "·".dim(), name.dim(), truncate(args, 80).dim());
    }

    fn print_subagent_status(&self, msg: &str) {
        println!("  {}", msg.dim());
    }

    fn print_diff(&self, path: &str, old: &str, new: &str) {
        println!();
        println!("{} {}", "diff:".bold(), path);
        let diff = TextDiff::from_lines(old, new);
        let mut shown = 0;
        for change in diff.iter_all_changes() {
            if shown >= MAX_DIFF_LINES {
                println!("{}", "... (diff truncated)".dim());
                break;
            }
            let line = change.to_string();
            let line = line.trim_end_matches('\n');
            match change.tag() {
                ChangeTag::Delete => println!("{}", format!("-{}", line).red()),
                ChangeTag::Insert => println!("{}", format!("+{}", line).green()),
                ChangeTag::Equal => println!(" {}", line.to_string().dim()),
            }
            shown += 1;
        }
    }

    fn print_file_preview(&self, path: &str, content: &str) {
        println!();
        println!("{} {}", "new file:".bold(), path);
        for (i, line) in content.lines().take(MAX_DIFF_LINES).enumerate() {
            println!("{}", format!("+{:>4} {}", i + 1, line).green());
        }
        if content.lines().count() > MAX_DIFF_LINES {
            println!("{}", "... (preview truncated)".dim());
        }
    }

    fn print_plan_preview(&self, plan: &str) {
        println!();
        println!("{}", "plan:".bold());
        println!("{}", plan);
    }

    async fn confirm(&self, prompt: &str) -> bool {
        print!("{} [y/N] ", prompt.bold());
        std::io::stdout().flush().ok();

        let Some(line) = read_line_blocking().await else {
            return false;
        };
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Read one line from stdin without blocking the runtime
pub async fn read_line_blocking() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(_) => None,
        }
    })
    .await
    .ok()
    .flatten()
}

struct ListenerState {
    paused: AtomicBool,
    stopped: AtomicBool,
}

/// Background raw-mode listener that cancels the turn token when Esc (or
/// Ctrl+C, which raw mode swallows as a key event) is pressed.
struct EscListener {
    state: Arc<ListenerState>,
}

impl EscListener {
    fn start(parent: CancellationToken) -> Option<(CancellationToken, Self)> {
        if terminal::enable_raw_mode().is_err() {
            return None;
        }

        let token = parent.child_token();
        let state = Arc::new(ListenerState {
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });

        let thread_state = state.clone();
        let thread_token = token.clone();
        std::thread::spawn(move || {
            while !thread_state.stopped.load(Ordering::Acquire) {
                if thread_state.paused.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(50));
                    continue;
                }
                let ready = crossterm::event::poll(Duration::from_millis(100)).unwrap_or(false);
                if !ready {
                    continue;
                }
                let Ok(event) = crossterm::event::read() else {
                    continue;
                };
                if let Event::Key(key) = event {
                    let is_esc = key.code == KeyCode::Esc;
                    let is_ctrl_c = key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL);
                    if is_esc || is_ctrl_c {
                        thread_token.cancel();
                    }
                }
            }
        });

        Some((token, Self { state }))
    }
}

impl Interrupter for EscListener {
    fn pause(&mut self) {
        self.state.paused.store(true, Ordering::Release);
        let _ = terminal::disable_raw_mode();
    }

    fn resume(&mut self) {
        let _ = terminal::enable_raw_mode();
        self.state.paused.store(false, Ordering::Release);
    }

    fn stop(&mut self) {
        self.state.stopped.store(true, Ordering::Release);
        let _ = terminal::disable_raw_mode();
    }
}

impl Drop for EscListener {
    fn drop(&mut self) {
        self.stop();
    }
}
