//! Terminal abstraction used by the agent loop.
//!
//! The concrete terminal lives in the CLI; the agent sees only this trait,
//! which keeps the orchestrator testable with scripted implementations.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Handle to the out-of-band interrupt listener.
///
/// The listener is paused while a confirmation prompt reads from the TTY
/// (raw mode would swallow the line-buffered input) and resumed after.
pub trait Interrupter: Send {
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
}

/// Interrupter used when raw-mode listening is unavailable
pub struct NoopInterrupter;

impl Interrupter for NoopInterrupter {
    fn pause(&mut self) {}
    fn resume(&mut self) {}
    fn stop(&mut self) {}
}

/// Terminal output and interaction methods used by the agent
#[async_trait]
pub trait Ui: Send + Sync {
    /// Start listening for the interrupt key, returning a token that fires
    /// when it is pressed (derived from `parent`). Implementations without
    /// a raw-mode terminal fall back to the parent token alone.
    fn start_interrupt_listener(
        &self,
        parent: CancellationToken,
    ) -> (CancellationToken, Box<dyn Interrupter>) {
        (parent.child_token(), Box::new(NoopInterrupter))
    }

    fn print_spinner(&self);
    fn clear_spinner(&self);

    /// Print a streamed chunk of assistant text
    fn print_assistant(&self, text: &str);
    /// Finish the assistant block
    fn print_assistant_done(&self);

    fn print_warning(&self, msg: &str);
    fn print_tool_call(&self, name: &str, args: &str);
    fn print_tool_result(&self, result: &str);
    fn print_subagent_tool_call(&self, name: &str, args: &str);
    fn print_subagent_status(&self, msg: &str);

    /// Render an old/new diff for a pending write or edit
    fn print_diff(&self, path: &str, old: &str, new: &str);
    /// Render the full content of a pending new file
    fn print_file_preview(&self, path: &str, content: &str);
    /// Render a pending task plan
    fn print_plan_preview(&self, plan: &str);

    /// Ask the user to approve a pending operation
    async fn confirm(&self, prompt: &str) -> bool;
}
