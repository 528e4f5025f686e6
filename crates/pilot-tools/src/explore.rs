//! Codebase exploration tool.
//!
//! The actual sub-agent lives in the agent layer; this tool holds a plain
//! callback injected after registry construction.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::registry::{parse_input, Tool, ToolError, ToolOutcome};

/// Callback that runs a sub-agent exploration and returns its summary
pub type ExploreFn = Arc<
    dyn Fn(String, CancellationToken) -> BoxFuture<'static, Result<String, String>> + Send + Sync,
>;

/// Tool that delegates broad codebase questions to a read-only sub-agent
pub struct ExploreTool {
    func: Option<ExploreFn>,
}

impl ExploreTool {
    pub fn new(func: ExploreFn) -> Self {
        Self { func: Some(func) }
    }

    pub fn unconfigured() -> Self {
        Self { func: None }
    }
}

#[derive(Deserialize)]
struct ExploreInput {
    task: String,
}

#[async_trait]
impl Tool for ExploreTool {
    fn name(&self) -> &str {
        "explore"
    }

    fn description(&self) -> &str {
        r#"Explore the codebase to answer broad questions by delegating to a focused sub-agent. The sub-agent has its own context and read-only tools (glob, grep, ls, read). Use this for questions like "how does authentication work?", "what's the project structure?", or "find all API endpoints". Do NOT use this for direct tasks like editing files or running commands — only for research and exploration."#
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "What to explore or research in the codebase"
                }
            },
            "required": ["task"]
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, raw_args: &str, cancel: CancellationToken) -> ToolOutcome {
        let params: ExploreInput = parse_input(raw_args)?;
        if params.task.is_empty() {
            return Err(ToolError::msg("task is required"));
        }
        let Some(func) = &self.func else {
            return Err(ToolError::msg("explore sub-agent not configured"));
        };
        func(params.task, cancel)
            .await
            .map_err(ToolError::Recoverable)
    }
}
