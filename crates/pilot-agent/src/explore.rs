//! The explore sub-agent: an isolated child orchestrator with read-only
//! tools, used to research the codebase without polluting the parent's
//! context with search noise.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use pilot_ai::{LlmClient, Message};
use pilot_tools::Registry;
use tokio_util::sync::CancellationToken;

use crate::ui::Ui;

/// Iteration limit for the explore sub-agent
pub const MAX_EXPLORE_ITERATIONS: u32 = 30;

pub(crate) type UiSlot = Arc<Mutex<Option<Arc<dyn Ui>>>>;

/// Run a child agent with read-only tools to research the codebase.
///
/// Uses unary `send` rather than `stream` so its output never interleaves
/// with the parent's streamed assistant text. The final assistant message
/// without tool calls becomes the parent's tool-result string.
pub(crate) async fn run_explore(
    client: Arc<dyn LlmClient>,
    work_dir: PathBuf,
    task: String,
    cancel: CancellationToken,
    ui_slot: UiSlot,
) -> Result<String, String> {
    let registry = Registry::read_only(&work_dir);
    let tool_defs = registry.definitions();

    let mut messages = vec![
        Message::system(explore_system_prompt(&work_dir)),
        Message::user(task),
    ];
    let mut total_steps = 0u32;

    for _iteration in 0..MAX_EXPLORE_ITERATIONS {
        let resp = client
            .send(&cancel, &messages, &tool_defs)
            .await
            .map_err(|e| format!("explore sub-agent LLM error: {}", e))?;

        messages.push(resp.message.clone());

        // No tool calls means the sub-agent is done; return its final text.
        if resp.message.tool_calls.is_empty() {
            if let Some(ui) = ui_slot.lock().clone() {
                ui.print_subagent_status(&format!("Explore complete ({} tool calls)", total_steps));
            }
            return Ok(resp.message.content_str().to_string());
        }

        for call in &resp.message.tool_calls {
            total_steps += 1;
            if let Some(ui) = ui_slot.lock().clone() {
                ui.print_subagent_tool_call(&call.name, &call.arguments);
            }
        }

        // Everything here is read-only, so all calls run in parallel.
        let outputs = join_all(resp.message.tool_calls.iter().map(|call| {
            let cancel = cancel.clone();
            let registry = &registry;
            async move {
                match registry.execute(&call.name, &call.arguments, cancel).await {
                    Ok(output) => output,
                    Err(e) => format!("Error: {}", e),
                }
            }
        }))
        .await;

        for (call, output) in resp.message.tool_calls.iter().zip(outputs) {
            messages.push(Message::tool_result(&call.id, output));
        }
    }

    if let Some(ui) = ui_slot.lock().clone() {
        ui.print_subagent_status(&format!(
            "Explore reached max iterations ({} tool calls)",
            total_steps
        ));
    }
    Ok("Explore sub-agent reached maximum iterations without completing.".to_string())
}

fn explore_system_prompt(work_dir: &Path) -> String {
    format!(
        r#"You are an exploration sub-agent. Your job is to thoroughly research the codebase to answer the given question.

Working directory: {}

This is a READ-ONLY exploration task. You only have access to: glob, grep, ls, read.

Guidelines:
- Use glob for broad file pattern matching (prefer over repeated ls calls)
- Use grep for searching file contents with regex
- Use read when you know the specific file path
- Use ls only when you need to see directory structure

You are meant to be a fast agent. To achieve this:
- Make efficient use of your tools — be smart about how you search
- Wherever possible, call multiple tools in parallel. When you find several files to read, read them ALL in one response instead of one at a time
- Start broad (glob, grep) then narrow down to specific reads

When you have gathered enough information, provide a clear, structured summary of your findings. Do not ask follow-up questions — just research and report."#,
        work_dir.display()
    )
}
