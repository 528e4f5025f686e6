//! Deferred-confirmation protocol for side-effectful tools

use std::fmt;

use futures::future::BoxFuture;

/// Future returned by a confirmation's deferred action
pub type ExecuteFuture = BoxFuture<'static, Result<String, String>>;

type ExecuteFn = Box<dyn FnOnce() -> ExecuteFuture + Send>;

/// Signals that a tool needs user approval before acting.
///
/// Carries a human-readable preview pair for diff rendering and a closure
/// that performs the side effect. The orchestrator shows the preview,
/// obtains approval, and either invokes [`execute`](Self::execute) or
/// records a denial.
pub struct NeedsConfirmation {
    /// Name of the tool requesting confirmation
    pub tool: String,
    /// Target path, command, or plan label
    pub target: String,
    /// Previous content (empty for new files), the command for bash, or the
    /// plan text for write_tasks
    pub preview: String,
    /// New content, for diff display; empty when there is nothing to diff
    pub new_content: String,
    execute: ExecuteFn,
}

impl NeedsConfirmation {
    pub fn new(
        tool: impl Into<String>,
        target: impl Into<String>,
        preview: impl Into<String>,
        new_content: impl Into<String>,
        execute: impl FnOnce() -> ExecuteFuture + Send + 'static,
    ) -> Self {
        Self {
            tool: tool.into(),
            target: target.into(),
            preview: preview.into(),
            new_content: new_content.into(),
            execute: Box::new(execute),
        }
    }

    /// Perform the deferred side effect
    pub async fn execute(self) -> Result<String, String> {
        (self.execute)().await
    }
}

impl fmt::Display for NeedsConfirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} requires confirmation for {}", self.tool, self.target)
    }
}

impl fmt::Debug for NeedsConfirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeedsConfirmation")
            .field("tool", &self.tool)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_runs_deferred_action() {
        let confirm = NeedsConfirmation::new("write", "a.txt", "", "new", || {
            Box::pin(async { Ok("wrote it".to_string()) })
        });
        assert_eq!(confirm.to_string(), "write requires confirmation for a.txt");
        assert_eq!(confirm.execute().await.unwrap(), "wrote it");
    }
}
