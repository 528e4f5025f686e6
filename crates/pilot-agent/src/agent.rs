//! The agent orchestrator: turn loop, tool dispatch, and compaction gate

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use pilot_ai::{accumulate, FinishReason, LlmClient, Message, Role, ToolCall};
use pilot_tools::{NeedsConfirmation, Registry, TaskCallbacks, ToolError};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{Checkpoint, FileSnapshot};
use crate::compaction::{
    compaction_prompt, estimate_tokens, estimate_tool_def_tokens, estimate_total_tokens,
    serialize_history, CONTEXT_BUFFER,
};
use crate::error::{Error, Result};
use crate::explore::{run_explore, UiSlot};
use crate::session::generate_session_id;
use crate::task::TaskStore;
use crate::ui::{Interrupter, Ui};

/// Limit on LLM round-trips per user message, preventing runaway
/// tool-use loops
pub const MAX_ITERATIONS_PER_TURN: u32 = 50;

/// Orchestrates the LLM conversation and tool execution loop
pub struct Agent {
    pub(crate) client: Arc<Mutex<Arc<dyn LlmClient>>>,
    pub(crate) registry: Registry,
    pub(crate) messages: Vec<Message>,
    pub(crate) work_dir: PathBuf,
    pub(crate) context_window: u32,
    /// total_tokens from the most recent API response
    pub(crate) last_tokens_used: u32,
    pub(crate) session_id: String,
    pub(crate) session_created: DateTime<Utc>,
    /// Ordered by turn
    pub(crate) checkpoints: Vec<Checkpoint>,
    /// Pre-session state of each modified file
    pub(crate) file_originals: HashMap<PathBuf, FileSnapshot>,
    pub(crate) tasks: TaskStore,
    /// The active turn's UI, visible to the explore sub-agent
    pub(crate) ui_slot: UiSlot,
    /// Session storage override; defaults to the per-project global dir
    pub(crate) sessions_root: Option<PathBuf>,
}

struct ToolCallResult {
    id: String,
    output: String,
}

impl Agent {
    /// Create an agent with the system prompt initialized and the explore
    /// and task callbacks wired into the registry.
    pub fn new(
        client: Arc<dyn LlmClient>,
        mut registry: Registry,
        work_dir: impl Into<PathBuf>,
        context_window: u32,
    ) -> Self {
        let work_dir = work_dir.into();
        let client = Arc::new(Mutex::new(client));
        let tasks = TaskStore::default();
        let ui_slot: UiSlot = Arc::new(Mutex::new(None));

        // The explore and task tools need functionality owned by the agent;
        // the registry gets plain function references instead of knowing
        // the Agent type.
        {
            let client = client.clone();
            let work_dir = work_dir.clone();
            let ui_slot = ui_slot.clone();
            registry.set_explore_fn(Arc::new(move |task, cancel| {
                let client = client.lock().clone();
                Box::pin(run_explore(
                    client,
                    work_dir.clone(),
                    task,
                    cancel,
                    ui_slot.clone(),
                ))
            }));
        }
        {
            let write = tasks.clone();
            let update = tasks.clone();
            let read = tasks.clone();
            registry.set_task_callbacks(TaskCallbacks {
                write_tasks: Arc::new(move |inputs| write.write(inputs)),
                update_task: Arc::new(move |id, status| update.update(id, status)),
                read_tasks: Arc::new(move || read.summary()),
            });
        }

        let messages = vec![Message::system(build_system_prompt(&work_dir))];

        Self {
            client,
            registry,
            messages,
            work_dir,
            context_window,
            last_tokens_used: 0,
            session_id: generate_session_id(),
            session_created: Utc::now(),
            checkpoints: Vec::new(),
            file_originals: HashMap::new(),
            tasks,
            ui_slot,
            sessions_root: None,
        }
    }

    /// Swap the LLM client and context window (e.g. after /model)
    pub fn set_client(&mut self, client: Arc<dyn LlmClient>, context_window: u32) {
        *self.client.lock() = client;
        self.context_window = context_window;
    }

    /// Override where sessions are stored (defaults to the global
    /// per-project directory)
    pub fn set_sessions_root(&mut self, root: PathBuf) {
        self.sessions_root = Some(root);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Formatted task list for `/tasks`
    pub fn task_summary(&self) -> String {
        self.tasks.summary()
    }

    pub(crate) fn client(&self) -> Arc<dyn LlmClient> {
        self.client.lock().clone()
    }

    /// Process one user message through the agent loop.
    ///
    /// Snapshots a checkpoint, appends the user message, then iterates:
    /// compact if needed, stream a response, dispatch tool calls, append
    /// results — until the model stops calling tools or the iteration
    /// budget runs out.
    pub async fn run(
        &mut self,
        user_message: &str,
        ui: Arc<dyn Ui>,
        parent_cancel: CancellationToken,
    ) -> Result<()> {
        self.create_checkpoint(user_message);
        self.messages.push(Message::user(user_message));
        *self.ui_slot.lock() = Some(ui.clone());

        let (op_cancel, mut listener) = ui.start_interrupt_listener(parent_cancel);
        let result = self
            .run_loop(&op_cancel, ui.as_ref(), listener.as_mut())
            .await;
        listener.stop();
        *self.ui_slot.lock() = None;
        result
    }

    async fn run_loop(
        &mut self,
        cancel: &CancellationToken,
        ui: &dyn Ui,
        listener: &mut dyn Interrupter,
    ) -> Result<()> {
        for _iteration in 0..MAX_ITERATIONS_PER_TURN {
            self.compact_if_needed(cancel, ui).await;
            ui.print_spinner();

            let defs = self.registry.definitions();
            let stream = match self.client().stream(cancel, &self.messages, &defs).await {
                Ok(stream) => stream,
                Err(e) => {
                    ui.clear_spinner();
                    if cancel.is_cancelled() || e.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    return Err(Error::Ai(e));
                }
            };

            let mut spinner_cleared = false;
            let accumulated = accumulate(stream, |text| {
                if !spinner_cleared {
                    ui.clear_spinner();
                    spinner_cleared = true;
                }
                ui.print_assistant(text);
            })
            .await;
            if !spinner_cleared {
                // Tool-only responses never stream text.
                ui.clear_spinner();
            }
            let resp = match accumulated {
                Ok(resp) => resp,
                Err(e) => {
                    if cancel.is_cancelled() || e.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    return Err(Error::Ai(e));
                }
            };

            if resp.usage.total_tokens > 0 {
                self.last_tokens_used = resp.usage.total_tokens;
            }

            self.messages.push(resp.message.clone());

            match resp.finish_reason {
                Some(FinishReason::Length) => {
                    ui.print_assistant_done();
                    ui.print_warning("Response was truncated due to token limit.");
                    return Ok(());
                }
                Some(FinishReason::Stop) => {
                    ui.print_assistant_done();
                    return Ok(());
                }
                _ => {}
            }

            if resp.message.tool_calls.is_empty() {
                ui.print_assistant_done();
                return Ok(());
            }

            // Close the streamed text block before tool output.
            if !resp.message.content_str().is_empty() {
                ui.print_assistant_done();
            }

            let results = self
                .execute_tool_calls(cancel, &resp.message.tool_calls, ui, listener)
                .await;
            if cancel.is_cancelled() {
                // Cancelled during tool execution; still record what we got.
                for result in results {
                    if !result.output.is_empty() {
                        self.messages
                            .push(Message::tool_result(result.id, result.output));
                    }
                }
                return Err(Error::Cancelled);
            }
            for result in results {
                self.messages
                    .push(Message::tool_result(result.id, result.output));
            }
        }

        Err(Error::MaxIterationsPerTurn(MAX_ITERATIONS_PER_TURN))
    }

    /// Run the turn's tool calls, in parallel when every call is read-only
    /// and there is more than one. Results keep call order either way.
    async fn execute_tool_calls(
        &mut self,
        cancel: &CancellationToken,
        calls: &[ToolCall],
        ui: &dyn Ui,
        listener: &mut dyn Interrupter,
    ) -> Vec<ToolCallResult> {
        let all_read_only = calls.iter().all(|c| self.registry.is_read_only(&c.name));

        if all_read_only && calls.len() > 1 {
            for call in calls {
                ui.print_tool_call(&call.name, &call.arguments);
            }

            let registry = &self.registry;
            let outputs = join_all(calls.iter().map(|call| {
                let cancel = cancel.clone();
                async move {
                    if serde_json::from_str::<serde_json::Value>(&call.arguments).is_err() {
                        return format!(
                            "Error: invalid JSON in tool arguments: {}",
                            call.arguments
                        );
                    }
                    match registry.execute(&call.name, &call.arguments, cancel).await {
                        Ok(output) => output,
                        Err(e) => format!("Error: {}", e),
                    }
                }
            }))
            .await;

            for output in &outputs {
                ui.print_tool_result(output);
            }

            calls
                .iter()
                .zip(outputs)
                .map(|(call, output)| ToolCallResult {
                    id: call.id.clone(),
                    output,
                })
                .collect()
        } else {
            // Write tools need interactive confirmation one at a time.
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                if serde_json::from_str::<serde_json::Value>(&call.arguments).is_err() {
                    ui.print_tool_call(&call.name, "invalid JSON");
                    results.push(ToolCallResult {
                        id: call.id.clone(),
                        output: format!(
                            "Error: invalid JSON in tool arguments: {}",
                            call.arguments
                        ),
                    });
                    continue;
                }

                ui.print_tool_call(&call.name, &call.arguments);

                let outcome = self
                    .registry
                    .execute(&call.name, &call.arguments, cancel.clone())
                    .await;
                let output = match outcome {
                    Ok(output) => output,
                    Err(ToolError::Confirmation(confirm)) => {
                        self.handle_confirmation(*confirm, ui, listener).await
                    }
                    Err(e) => format!("Error: {}", e),
                };

                ui.print_tool_result(&output);
                results.push(ToolCallResult {
                    id: call.id.clone(),
                    output,
                });
            }
            results
        }
    }

    async fn handle_confirmation(
        &mut self,
        confirm: NeedsConfirmation,
        ui: &dyn Ui,
        listener: &mut dyn Interrupter,
    ) -> String {
        match confirm.tool.as_str() {
            "write" => {
                if confirm.preview.is_empty() {
                    ui.print_file_preview(&confirm.target, &confirm.new_content);
                } else {
                    ui.print_diff(&confirm.target, &confirm.preview, &confirm.new_content);
                }
            }
            "edit" => ui.print_diff(&confirm.target, &confirm.preview, &confirm.new_content),
            "write_tasks" => ui.print_plan_preview(&confirm.preview),
            _ => {}
        }

        // Raw mode would swallow the line-buffered y/n read.
        listener.pause();
        let approved = ui
            .confirm(&format!("Apply {} to {}?", confirm.tool, confirm.target))
            .await;
        listener.resume();

        if !approved {
            return "User denied the operation.".to_string();
        }

        if confirm.tool == "write" || confirm.tool == "edit" {
            self.capture_file_before_modification(&confirm.target);
        }

        match confirm.execute().await {
            Ok(result) => result,
            Err(e) => format!("Error: {}", e),
        }
    }

    /// Compact when the conversation exceeds 80% of the context window
    pub(crate) async fn compact_if_needed(&mut self, cancel: &CancellationToken, ui: &dyn Ui) {
        if self.context_window == 0 {
            return;
        }
        let threshold = (self.context_window as f64 * (1.0 - CONTEXT_BUFFER)) as u32;
        let current = if self.last_tokens_used > 0 {
            self.last_tokens_used
        } else {
            estimate_total_tokens(&self.messages)
        };
        if current <= threshold {
            return;
        }

        ui.print_warning("Context is large, compacting conversation...");
        self.do_compact(cancel, ui).await;
    }

    /// Force an LLM-based compaction (the /compact command)
    pub async fn compact(&mut self, cancel: &CancellationToken, ui: &dyn Ui) {
        if self.messages.len() <= 1 {
            ui.print_warning("Nothing to compact.");
            return;
        }
        ui.print_warning("Compacting conversation...");
        self.do_compact(cancel, ui).await;
    }

    /// Ask the LLM for a summary and replace the history with
    /// `[system, summary, last user message]`. Best-effort: on failure the
    /// history is left unchanged.
    async fn do_compact(&mut self, cancel: &CancellationToken, ui: &dyn Ui) {
        let history = serialize_history(&self.messages);
        let compact_messages = vec![
            Message::system(compaction_prompt()),
            Message::user(history),
        ];

        let resp = match self.client().send(cancel, &compact_messages, &[]).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!("compaction failed: {}", e);
                ui.print_warning("Compaction failed, continuing with full history.");
                return;
            }
        };
        let summary = resp.message.content_str().to_string();

        let system_msg = self.messages[0].clone();
        let last_user = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .cloned();

        self.messages = vec![system_msg];
        if !summary.is_empty() {
            self.messages.push(Message::user(format!(
                "[Conversation compacted] Here is a summary of our conversation so far:\n\n{}",
                summary
            )));
        }
        if let Some(last) = last_user {
            self.messages.push(last);
        }

        self.last_tokens_used = 0;
        ui.print_warning("Context compacted successfully.");
    }

    /// Reset the conversation to just the system prompt (the /clear command)
    pub fn clear(&mut self, ui: &dyn Ui) {
        self.messages.truncate(1);
        self.checkpoints.clear();
        self.last_tokens_used = 0;
        ui.print_warning("Conversation cleared.");
    }

    /// Current context usage statistics for `/context`
    pub fn context_usage(&self) -> ContextStats {
        let mut stats = ContextStats {
            context_window: self.context_window,
            threshold: (self.context_window as f64 * (1.0 - CONTEXT_BUFFER)) as u32,
            message_count: self.messages.len(),
            actual_tokens: self.last_tokens_used,
            ..Default::default()
        };
        for msg in &self.messages {
            let tokens = estimate_tokens(msg);
            if msg.role == Role::System {
                stats.system_tokens += tokens;
            } else {
                stats.message_tokens += tokens;
            }
        }
        stats.tool_def_tokens = estimate_tool_def_tokens(&self.registry.definitions());
        stats.total_tokens = stats.actual_tokens;
        if stats.total_tokens == 0 {
            stats.total_tokens = stats.system_tokens + stats.tool_def_tokens + stats.message_tokens;
        }
        stats
    }
}

/// Context usage statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextStats {
    /// Actual from the API, or estimated
    pub total_tokens: u32,
    pub context_window: u32,
    pub threshold: u32,
    pub message_count: usize,
    /// System prompt estimate
    pub system_tokens: u32,
    /// Tool definitions estimate
    pub tool_def_tokens: u32,
    /// All user + assistant + tool result messages
    pub message_tokens: u32,
    /// From the latest API response (0 if no call yet)
    pub actual_tokens: u32,
}

/// Build the system prompt: identity and policy, the working directory,
/// and the project memory file when present.
pub(crate) fn build_system_prompt(work_dir: &Path) -> String {
    let mut prompt = String::from(IDENTITY_PROMPT);

    prompt.push_str("# Environment\n\nWorking directory: ");
    prompt.push_str(&work_dir.display().to_string());
    prompt.push_str("\n\n");

    prompt.push_str(
        "# Memory\n\nProject knowledge is stored in MEMORY.md at the project root. This file is human-editable and version-controlled.\nTo persist important context (conventions, architecture decisions, gotchas), use the edit tool to update MEMORY.md.\n",
    );

    let memory_path = work_dir.join("MEMORY.md");
    if let Ok(memory) = std::fs::read_to_string(&memory_path) {
        if !memory.is_empty() {
            prompt.push_str("\n## Project Memory (MEMORY.md)\n\n");
            prompt.push_str(&memory);
            prompt.push('\n');
        }
    }

    prompt
}

const IDENTITY_PROMPT: &str = r#"You are Pilot, an AI coding assistant running in the terminal. You help users with software engineering tasks. Use the instructions below and the tools available to you to assist the user.

IMPORTANT: Assist with authorized security testing, defensive security, CTF challenges, and educational contexts. Refuse requests for destructive techniques, DoS attacks, mass targeting, supply chain compromise, or detection evasion for malicious purposes.

# Doing tasks
The user will primarily request you to perform software engineering tasks. These include solving bugs, adding new functionality, refactoring code, explaining code, and more.
- NEVER propose changes to code you haven't read. If a user asks about or wants you to modify a file, read it first. Understand existing code before suggesting modifications.
- Be careful not to introduce security vulnerabilities such as command injection, XSS, SQL injection, and other OWASP top 10 vulnerabilities. If you notice that you wrote insecure code, immediately fix it.
- Avoid over-engineering. Only make changes that are directly requested or clearly necessary. Keep solutions simple and focused.
  - Don't add features, refactor code, or make "improvements" beyond what was asked. A bug fix doesn't need surrounding code cleaned up. A simple feature doesn't need extra configurability. Don't add docstrings, comments, or type annotations to code you didn't change. Only add comments where the logic isn't self-evident.
  - Don't add error handling, fallbacks, or validation for scenarios that can't happen. Trust internal code and framework guarantees. Only validate at system boundaries (user input, external APIs). Don't use feature flags or backwards-compatibility shims when you can just change the code.
  - Don't create helpers, utilities, or abstractions for one-time operations. Don't design for hypothetical future requirements. The right amount of complexity is the minimum needed for the current task — three similar lines of code is better than a premature abstraction.
- Avoid backwards-compatibility hacks like renaming unused `_vars`, re-exporting types, adding `// removed` comments for removed code, etc. If something is unused, delete it completely.

# Executing actions with care

Carefully consider the reversibility and blast radius of actions. Generally you can freely take local, reversible actions like editing files or running tests. But for actions that are hard to reverse, affect shared systems beyond your local environment, or could otherwise be risky or destructive, check with the user before proceeding. The cost of pausing to confirm is low, while the cost of an unwanted action (lost work, unintended messages sent, deleted branches) can be very high.

Examples of risky actions that warrant user confirmation:
- Destructive operations: deleting files/branches, dropping database tables, killing processes, rm -rf, overwriting uncommitted changes
- Hard-to-reverse operations: force-pushing, git reset --hard, amending published commits, removing or downgrading packages/dependencies
- Actions visible to others or that affect shared state: pushing code, creating/closing/commenting on PRs or issues, sending messages, modifying shared infrastructure

When you encounter an obstacle, do not use destructive actions as a shortcut. Try to identify root causes and fix underlying issues rather than bypassing safety checks (e.g. --no-verify). If you discover unexpected state like unfamiliar files, branches, or configuration, investigate before deleting or overwriting, as it may represent the user's in-progress work. When in doubt, ask before acting.

# Tool usage policy
- You can call multiple tools in a single response. If you intend to call multiple tools and there are no dependencies between them, make all independent tool calls in parallel. However, if some tool calls depend on previous calls, do NOT call these tools in parallel — call them sequentially instead.
- Use dedicated tools instead of bash for file operations: read for reading files (not cat/head/tail), edit for editing (not sed/awk), write for creating files (not echo/cat with heredoc). Reserve bash exclusively for system commands and terminal operations that require shell execution.
- NEVER use bash echo or other command-line tools to communicate with the user. Output all communication directly in your response text.
- Do not create files unless they're absolutely necessary for achieving your goal. ALWAYS prefer editing an existing file to creating a new one, including markdown files.
- For broad codebase exploration questions (project structure, how a feature works, finding patterns across files), use the explore tool to delegate the research to a focused sub-agent. This keeps the main conversation focused and avoids cluttering context with intermediate search results.

# Tone and style
- Only use emojis if the user explicitly requests it.
- Your output will be displayed on a command line interface. Responses should be short and concise. You can use Github-flavored markdown for formatting.
- Do not use a colon before tool calls. Text like "Let me read the file:" followed by a tool call should just be "Let me read the file." with a period.
- Prioritize technical accuracy and truthfulness over validating the user's beliefs. Provide direct, objective technical info without unnecessary praise or emotional validation. Disagree when necessary — objective guidance and respectful correction are more valuable than false agreement.
- Never give time estimates or predictions for how long tasks will take. Focus on what needs to be done, not how long it might take.

# Git workflow
When asked to create git commits:
- Only commit when the user explicitly requests it
- NEVER force-push, reset --hard, use --no-verify, or amend unless the user explicitly asks
- Prefer staging specific files over `git add -A` or `git add .`
- NEVER use interactive flags (`-i`) since they require interactive input
- Use HEREDOC for multi-line commit messages
When asked to create pull requests:
- Use `gh pr create` with a clear title and structured body
- Keep PR titles short (under 70 characters)

"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::list_sessions_in;
    use async_trait::async_trait;
    use pilot_ai::{EventStream, Response, StreamEvent, ToolCallDelta, ToolDef, Usage};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    // ===== Scripted LLM client =====

    struct MockClient {
        responses: Mutex<VecDeque<Response>>,
        send_calls: AtomicU32,
        stream_calls: AtomicU32,
    }

    impl MockClient {
        fn new(responses: Vec<Response>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                send_calls: AtomicU32::new(0),
                stream_calls: AtomicU32::new(0),
            })
        }

        fn next_response(&self) -> pilot_ai::Result<Response> {
            self.responses.lock().pop_front().ok_or_else(|| {
                pilot_ai::Error::UnexpectedResponse("no scripted response left".into())
            })
        }
    }

    #[async_trait]
    impl LlmClient for MockClient {
        async fn send(
            &self,
            _cancel: &CancellationToken,
            _messages: &[Message],
            _tools: &[ToolDef],
        ) -> pilot_ai::Result<Response> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            self.next_response()
        }

        async fn stream(
            &self,
            _cancel: &CancellationToken,
            _messages: &[Message],
            _tools: &[ToolDef],
        ) -> pilot_ai::Result<EventStream> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            let resp = self.next_response()?;

            let mut events = Vec::new();
            if let Some(text) = &resp.message.content {
                events.push(StreamEvent::TextDelta {
                    delta: text.clone(),
                });
            }
            for (index, call) in resp.message.tool_calls.iter().enumerate() {
                events.push(StreamEvent::ToolCallDeltas {
                    deltas: vec![ToolCallDelta {
                        index,
                        id: Some(call.id.clone()),
                        name: Some(call.name.clone()),
                        arguments: Some(call.arguments.clone()),
                    }],
                });
            }
            if resp.usage.total_tokens > 0 {
                events.push(StreamEvent::Usage { usage: resp.usage });
            }
            if let Some(reason) = resp.finish_reason {
                events.push(StreamEvent::FinishReason { reason });
            }
            events.push(StreamEvent::Done);

            Ok(Box::pin(tokio_stream::iter(events)))
        }
    }

    // ===== Scripted UI =====

    struct TestUi {
        approvals: Mutex<VecDeque<bool>>,
        warnings: Mutex<Vec<String>>,
    }

    impl TestUi {
        fn approving() -> Arc<Self> {
            Self::with_approvals(vec![])
        }

        fn with_approvals(approvals: Vec<bool>) -> Arc<Self> {
            Arc::new(Self {
                approvals: Mutex::new(approvals.into()),
                warnings: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Ui for TestUi {
        fn print_spinner(&self) {}
        fn clear_spinner(&self) {}
        fn print_assistant(&self, _text: &str) {}
        fn print_assistant_done(&self) {}
        fn print_warning(&self, msg: &str) {
            self.warnings.lock().push(msg.to_string());
        }
        fn print_tool_call(&self, _name: &str, _args: &str) {}
        fn print_tool_result(&self, _result: &str) {}
        fn print_subagent_tool_call(&self, _name: &str, _args: &str) {}
        fn print_subagent_status(&self, _msg: &str) {}
        fn print_diff(&self, _path: &str, _old: &str, _new: &str) {}
        fn print_file_preview(&self, _path: &str, _content: &str) {}
        fn print_plan_preview(&self, _plan: &str) {}

        async fn confirm(&self, _prompt: &str) -> bool {
            // Unscripted confirms default to approval.
            self.approvals.lock().pop_front().unwrap_or(true)
        }
    }

    // ===== Helpers =====

    fn text_response(text: &str) -> Response {
        Response {
            message: Message::text(Role::Assistant, text),
            finish_reason: Some(FinishReason::Stop),
            usage: Usage::default(),
        }
    }

    fn tool_response(calls: Vec<(&str, &str, serde_json::Value)>) -> Response {
        Response {
            message: Message::assistant(
                None,
                calls
                    .into_iter()
                    .map(|(id, name, args)| ToolCall {
                        id: id.into(),
                        name: name.into(),
                        arguments: args.to_string(),
                    })
                    .collect(),
            ),
            finish_reason: Some(FinishReason::ToolCalls),
            usage: Usage::default(),
        }
    }

    fn make_agent(work_dir: &Path, responses: Vec<Response>) -> (Agent, Arc<MockClient>) {
        let client = MockClient::new(responses);
        let registry = Registry::builtin(work_dir);
        let agent = Agent::new(client.clone(), registry, work_dir, 200_000);
        (agent, client)
    }

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    // ===== Scenarios =====

    // S1: single-turn text response.
    #[tokio::test]
    async fn test_single_turn_text() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, _) = make_agent(dir.path(), vec![text_response("Hello")]);

        agent.run("hi", TestUi::approving(), cancel()).await.unwrap();

        let messages = agent.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].content_str(), "Hello");
        assert!(messages[2].tool_calls.is_empty());
    }

    // S2: one tool round-trip.
    #[tokio::test]
    async fn test_tool_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, _) = make_agent(
            dir.path(),
            vec![
                tool_response(vec![("c1", "glob", serde_json::json!({"pattern": "*.go"}))]),
                text_response("done"),
            ],
        );

        agent.run("find go files", TestUi::approving(), cancel()).await.unwrap();

        let messages = agent.messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[3].role, Role::Tool);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("c1"));
        // Empty temp dir: the registry's actual output for no matches.
        assert_eq!(messages[3].content_str(), "No files matched the pattern.");
        assert_eq!(messages[4].content_str(), "done");
    }

    // S3: two parallel read-only calls keep call order.
    #[tokio::test]
    async fn test_parallel_read_only_calls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();
        let (mut agent, _) = make_agent(
            dir.path(),
            vec![
                tool_response(vec![
                    ("c1", "glob", serde_json::json!({"pattern": "*.rs"})),
                    ("c2", "grep", serde_json::json!({"pattern": "fn main"})),
                ]),
                text_response("ok"),
            ],
        );

        agent.run("look around", TestUi::approving(), cancel()).await.unwrap();

        let messages = agent.messages();
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("c1"));
        assert!(messages[3].content_str().contains("main.rs"));
        assert_eq!(messages[4].tool_call_id.as_deref(), Some("c2"));
        assert!(messages[4].content_str().contains("fn main"));
    }

    // S4: denied edit leaves the file untouched.
    #[tokio::test]
    async fn test_edit_denied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello world").unwrap();
        let (mut agent, _) = make_agent(
            dir.path(),
            vec![
                tool_response(vec![(
                    "c1",
                    "edit",
                    serde_json::json!({"path": "a.txt", "old_str": "hello", "new_str": "hi"}),
                )]),
                text_response("understood"),
            ],
        );

        agent
            .run("change it", TestUi::with_approvals(vec![false]), cancel())
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "hello world"
        );
        assert_eq!(agent.messages()[3].content_str(), "User denied the operation.");
    }

    // S5: approved edit with a unique match.
    #[tokio::test]
    async fn test_edit_approved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello world").unwrap();
        let (mut agent, _) = make_agent(
            dir.path(),
            vec![
                tool_response(vec![(
                    "c1",
                    "edit",
                    serde_json::json!({"path": "a.txt", "old_str": "hello", "new_str": "hi"}),
                )]),
                text_response("edited"),
            ],
        );

        agent.run("change it", TestUi::approving(), cancel()).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "hi world"
        );
        assert!(agent.messages()[3]
            .content_str()
            .contains("Successfully edited a.txt"));
    }

    // S6: duplicate match becomes a diagnostic tool result.
    #[tokio::test]
    async fn test_edit_duplicate_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "aaa\naaa\n").unwrap();
        let (mut agent, _) = make_agent(
            dir.path(),
            vec![
                tool_response(vec![(
                    "c1",
                    "edit",
                    serde_json::json!({"path": "a.txt", "old_str": "aaa", "new_str": "bbb"}),
                )]),
                text_response("I see"),
            ],
        );

        agent.run("change it", TestUi::approving(), cancel()).await.unwrap();

        let result = agent.messages()[3].content_str();
        assert!(result.contains("matches 2 times"), "got: {}", result);
        assert!(result.contains("line 1, line 2"), "got: {}", result);
    }

    // S7: rewind undoes a created file and truncates the conversation.
    #[tokio::test]
    async fn test_rewind_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, _) = make_agent(
            dir.path(),
            vec![
                tool_response(vec![(
                    "c1",
                    "write",
                    serde_json::json!({"path": "new.go", "content": "package main\n"}),
                )]),
                text_response("created"),
                tool_response(vec![(
                    "c2",
                    "edit",
                    serde_json::json!({"path": "new.go", "old_str": "main", "new_str": "lib"}),
                )]),
                text_response("edited"),
            ],
        );
        let ui = TestUi::approving();

        agent.run("create new.go", ui.clone(), cancel()).await.unwrap();
        assert!(dir.path().join("new.go").exists());

        agent.run("now edit it", ui, cancel()).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("new.go")).unwrap(),
            "package lib\n"
        );

        // Checkpoint 2 snapshot holds the file as written by turn 1.
        agent.rewind_code(2).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("new.go")).unwrap(),
            "package main\n"
        );

        // Rewinding to turn 1 (before the file existed) removes it and
        // truncates the history to before turn 1's user message.
        agent.rewind_all(1).unwrap();
        assert!(!dir.path().join("new.go").exists());
        assert_eq!(agent.messages().len(), 1);
        assert_eq!(agent.messages()[0].role, Role::System);
        assert!(agent.checkpoints().is_empty());
    }

    // S8: crossing the threshold triggers exactly one summarization send
    // before the turn's stream call.
    #[tokio::test]
    async fn test_compaction_at_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, client) = make_agent(
            dir.path(),
            vec![text_response("the summary"), text_response("answer")],
        );
        agent.context_window = 500;
        agent.messages.push(Message::user("earlier question"));
        agent
            .messages
            .push(Message::text(Role::Assistant, "earlier answer"));
        agent.last_tokens_used = 450; // above threshold 400

        agent.run("next question", TestUi::approving(), cancel()).await.unwrap();

        assert_eq!(client.send_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.stream_calls.load(Ordering::SeqCst), 1);

        let messages = agent.messages();
        // [system, compacted summary, last user message, assistant answer]
        assert_eq!(messages.len(), 4);
        assert!(messages[1].content_str().starts_with("[Conversation compacted]"));
        assert!(messages[1].content_str().contains("the summary"));
        assert_eq!(messages[2].content_str(), "next question");
        assert_eq!(messages[3].content_str(), "answer");
    }

    // Property 10: compaction monotonicity.
    #[tokio::test]
    async fn test_compact_leaves_three_messages_max() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, _) = make_agent(dir.path(), vec![text_response("summary text")]);
        let original_system = agent.messages[0].content_str().to_string();
        for i in 0..10 {
            agent.messages.push(Message::user(format!("question {}", i)));
            agent
                .messages
                .push(Message::text(Role::Assistant, format!("answer {}", i)));
        }

        let ui = TestUi::approving();
        agent.compact(&cancel(), ui.as_ref()).await;

        assert!(agent.messages().len() <= 3);
        assert_eq!(agent.messages()[0].role, Role::System);
        assert_eq!(agent.messages()[0].content_str(), original_system);
    }

    #[tokio::test]
    async fn test_compact_failure_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        // No scripted responses: the send fails.
        let (mut agent, _) = make_agent(dir.path(), vec![]);
        agent.messages.push(Message::user("q"));
        agent.messages.push(Message::text(Role::Assistant, "a"));

        let ui = TestUi::approving();
        agent.compact(&cancel(), ui.as_ref()).await;

        assert_eq!(agent.messages().len(), 3);
        assert!(ui
            .warnings
            .lock()
            .iter()
            .any(|w| w.contains("Compaction failed")));
    }

    // Property 12: a model that never stops calling tools hits the budget.
    #[tokio::test]
    async fn test_max_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let responses: Vec<Response> = (0..=MAX_ITERATIONS_PER_TURN)
            .map(|_| tool_response(vec![("c", "glob", serde_json::json!({"pattern": "*.x"}))]))
            .collect();
        let (mut agent, _) = make_agent(dir.path(), responses);

        let err = agent
            .run("loop forever", TestUi::approving(), cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MaxIterationsPerTurn(50)));
        assert!(err.to_string().contains("maximum iterations (50)"));
    }

    // Invalid argument JSON becomes a synthetic tool result; the turn goes on.
    #[tokio::test]
    async fn test_invalid_json_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad_call = tool_response(vec![("c1", "glob", serde_json::json!({}))]);
        bad_call.message.tool_calls[0].arguments = "{broken".into();
        let (mut agent, _) = make_agent(dir.path(), vec![bad_call, text_response("recovered")]);

        agent.run("go", TestUi::approving(), cancel()).await.unwrap();

        let result = agent.messages()[3].content_str();
        assert!(result.starts_with("Error: invalid JSON in tool arguments:"));
        assert_eq!(agent.messages()[4].content_str(), "recovered");
    }

    // Unknown tool names are recoverable.
    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, _) = make_agent(
            dir.path(),
            vec![
                tool_response(vec![("c1", "frobnicate", serde_json::json!({}))]),
                text_response("oops"),
            ],
        );

        agent.run("go", TestUi::approving(), cancel()).await.unwrap();
        assert!(agent.messages()[3]
            .content_str()
            .contains("unknown tool: frobnicate"));
    }

    // finish_reason = length warns and ends the turn.
    #[tokio::test]
    async fn test_length_finish_warns() {
        let dir = tempfile::tempdir().unwrap();
        let mut resp = text_response("truncated answer");
        resp.finish_reason = Some(FinishReason::Length);
        let (mut agent, _) = make_agent(dir.path(), vec![resp]);
        let ui = TestUi::approving();

        agent.run("go", ui.clone(), cancel()).await.unwrap();

        assert!(ui
            .warnings
            .lock()
            .iter()
            .any(|w| w.contains("truncated due to token limit")));
        assert_eq!(agent.messages().len(), 3);
    }

    // A pre-cancelled token ends the turn with the distinguished error.
    #[tokio::test]
    async fn test_cancellation_is_distinguished() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, _) = make_agent(dir.path(), vec![]);
        let token = CancellationToken::new();
        token.cancel();

        let err = agent
            .run("go", TestUi::approving(), token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    // write_tasks requires confirmation and survives in the task store.
    #[tokio::test]
    async fn test_write_tasks_flow() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, _) = make_agent(
            dir.path(),
            vec![
                tool_response(vec![(
                    "c1",
                    "write_tasks",
                    serde_json::json!({"tasks": [
                        {"content": "Add parser", "description": "write it", "active_form": "Adding parser"},
                        {"content": "Add tests", "description": "test it"}
                    ]}),
                )]),
                text_response("planned"),
            ],
        );

        agent.run("plan this", TestUi::approving(), cancel()).await.unwrap();

        let result = agent.messages()[3].content_str();
        assert!(result.contains("[ ] 1. Add parser"));
        assert!(result.contains("2 tasks (2 pending, 0 in progress, 0 completed)"));
        assert_eq!(agent.task_summary(), result);

        // The task list lives outside the history: clearing keeps it.
        agent.clear(TestUi::approving().as_ref());
        assert!(agent.task_summary().contains("Add parser"));
    }

    // Property 11: session save/resume round-trip.
    #[tokio::test]
    async fn test_session_resume_equivalence() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = tempfile::tempdir().unwrap();
        let (mut agent, _) = make_agent(dir.path(), vec![text_response("Hello")]);
        agent.set_sessions_root(sessions.path().to_path_buf());

        agent.run("hi there", TestUi::approving(), cancel()).await.unwrap();
        agent.save_session().unwrap();
        let saved_messages: Vec<Message> = agent.messages()[1..].to_vec();
        let session_id = agent.session_id().to_string();

        let (mut resumed, _) = make_agent(dir.path(), vec![]);
        resumed.set_sessions_root(sessions.path().to_path_buf());
        resumed.resume_session(&session_id).unwrap();

        assert_eq!(resumed.messages().len(), saved_messages.len() + 1);
        for (restored, saved) in resumed.messages()[1..].iter().zip(&saved_messages) {
            assert_eq!(restored.role, saved.role);
            assert_eq!(restored.content, saved.content);
        }
        // Checkpoint stubs come back from user messages, without snapshots.
        assert_eq!(resumed.checkpoints().len(), 1);
        assert_eq!(resumed.checkpoints()[0].preview, "hi there");

        let listed = list_sessions_in(sessions.path(), 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, session_id);
        assert_eq!(listed[0].preview, "hi there");
        assert_eq!(listed[0].msg_count, 2);
    }

    #[tokio::test]
    async fn test_save_skips_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = tempfile::tempdir().unwrap();
        let (mut agent, _) = make_agent(dir.path(), vec![]);
        agent.set_sessions_root(sessions.path().to_path_buf());

        agent.save_session().unwrap();
        assert!(list_sessions_in(sessions.path(), 0).unwrap().is_empty());
    }

    // History well-formedness: every tool message answers the nearest
    // prior assistant tool call.
    #[tokio::test]
    async fn test_history_well_formed() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, _) = make_agent(
            dir.path(),
            vec![
                tool_response(vec![
                    ("a1", "glob", serde_json::json!({"pattern": "*.rs"})),
                    ("a2", "ls", serde_json::json!({})),
                ]),
                tool_response(vec![("b1", "read_tasks", serde_json::json!({}))]),
                text_response("done"),
            ],
        );

        agent.run("go", TestUi::approving(), cancel()).await.unwrap();

        let messages = agent.messages();
        for (i, msg) in messages.iter().enumerate() {
            if msg.role != Role::Tool {
                continue;
            }
            let id = msg.tool_call_id.as_deref().unwrap();
            let assistant = messages[..i]
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant)
                .unwrap();
            assert!(
                assistant.tool_calls.iter().any(|c| c.id == id),
                "tool result {} has no matching call",
                id
            );
        }
    }

    #[tokio::test]
    async fn test_clear_resets_history_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agent, _) = make_agent(dir.path(), vec![text_response("hi")]);

        agent.run("hello", TestUi::approving(), cancel()).await.unwrap();
        assert_eq!(agent.messages().len(), 3);
        assert_eq!(agent.checkpoints().len(), 1);

        agent.clear(TestUi::approving().as_ref());
        assert_eq!(agent.messages().len(), 1);
        assert!(agent.checkpoints().is_empty());
        assert_eq!(agent.context_usage().actual_tokens, 0);
    }

    #[tokio::test]
    async fn test_context_usage_prefers_provider_figure() {
        let dir = tempfile::tempdir().unwrap();
        let mut resp = text_response("hi");
        resp.usage = Usage {
            prompt_tokens: 90,
            completion_tokens: 10,
            total_tokens: 100,
        };
        let (mut agent, _) = make_agent(dir.path(), vec![resp]);

        agent.run("hello", TestUi::approving(), cancel()).await.unwrap();

        let stats = agent.context_usage();
        assert_eq!(stats.actual_tokens, 100);
        assert_eq!(stats.total_tokens, 100);
        assert!(stats.tool_def_tokens > 0);
        assert_eq!(stats.message_count, 3);
    }

    // The explore tool runs a child orchestrator whose final text becomes
    // the parent's tool result.
    #[tokio::test]
    async fn test_explore_subagent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn api() {}\n").unwrap();
        let (mut agent, client) = make_agent(
            dir.path(),
            vec![
                // Parent stream: call explore.
                tool_response(vec![(
                    "c1",
                    "explore",
                    serde_json::json!({"task": "what is the public API?"}),
                )]),
                // Child send #1: a read-only tool call.
                tool_response(vec![("e1", "grep", serde_json::json!({"pattern": "pub fn"}))]),
                // Child send #2: final text, no tool calls.
                text_response("The API is a single function, api()."),
                // Parent stream #2: done.
                text_response("summarized"),
            ],
        );

        agent.run("explore the code", TestUi::approving(), cancel()).await.unwrap();

        assert_eq!(client.stream_calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.send_calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            agent.messages()[3].content_str(),
            "The API is a single function, api()."
        );
    }
}
