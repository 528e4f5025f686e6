//! Tool trait and dispatch registry

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use pilot_ai::ToolDef;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::confirm::NeedsConfirmation;
use crate::explore::{ExploreFn, ExploreTool};
use crate::task::{ReadTasksTool, TaskCallbacks, UpdateTaskTool, WriteTasksTool};
use crate::{BashTool, EditTool, GlobTool, GrepTool, LsTool, ReadTool, WriteTool};

/// How a tool execution can fail
#[derive(Debug, Error)]
pub enum ToolError {
    /// Recoverable failure; the message is surfaced to the model as the
    /// tool result
    #[error("{0}")]
    Recoverable(String),
    /// The tool needs user approval before acting
    #[error("{0}")]
    Confirmation(Box<NeedsConfirmation>),
}

impl ToolError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Recoverable(message.into())
    }
}

impl From<NeedsConfirmation> for ToolError {
    fn from(confirm: NeedsConfirmation) -> Self {
        Self::Confirmation(Box::new(confirm))
    }
}

/// Result of a tool execution
pub type ToolOutcome = Result<String, ToolError>;

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for the parameter object
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether the tool performs no writes; read-only tools may be
    /// dispatched in parallel
    fn read_only(&self) -> bool {
        false
    }

    /// Execute with raw JSON arguments
    async fn execute(&self, raw_args: &str, cancel: CancellationToken) -> ToolOutcome;
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: Option<Arc<jsonschema::Validator>>,
}

/// Holds tools in insertion order and dispatches execution by name.
///
/// The exposed definition order is a stable contract: it affects model
/// behavior and never changes between calls.
pub struct Registry {
    tools: Vec<RegisteredTool>,
}

impl Registry {
    /// Registry with the full built-in tool set.
    ///
    /// The explore and task tools are registered unconfigured; the agent
    /// injects their callbacks after construction via
    /// [`set_explore_fn`](Self::set_explore_fn) and
    /// [`set_task_callbacks`](Self::set_task_callbacks).
    pub fn builtin(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        let mut registry = Self { tools: Vec::new() };
        registry.register_read_only_tools(&work_dir);
        registry.register(Arc::new(WriteTasksTool::unconfigured()));
        registry.register(Arc::new(UpdateTaskTool::unconfigured()));
        registry.register(Arc::new(ReadTasksTool::unconfigured()));
        registry.register(Arc::new(WriteTool::new(work_dir.clone())));
        registry.register(Arc::new(EditTool::new(work_dir.clone())));
        registry.register(Arc::new(BashTool::new(work_dir)));
        registry.register(Arc::new(ExploreTool::unconfigured()));
        registry
    }

    /// Registry with only the read-only tools (glob, grep, ls, read);
    /// used by the explore sub-agent.
    pub fn read_only(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        let mut registry = Self { tools: Vec::new() };
        registry.register_read_only_tools(&work_dir);
        registry
    }

    fn register_read_only_tools(&mut self, work_dir: &std::path::Path) {
        self.register(Arc::new(GlobTool::new(work_dir.to_path_buf())));
        self.register(Arc::new(GrepTool::new(work_dir.to_path_buf())));
        self.register(Arc::new(LsTool::new(work_dir.to_path_buf())));
        self.register(Arc::new(ReadTool::new(work_dir.to_path_buf())));
    }

    /// Append a tool. Re-registering an existing name replaces the original
    /// in place so the exposed order never changes.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let validator = match jsonschema::validator_for(&tool.parameters_schema()) {
            Ok(v) => Some(Arc::new(v)),
            Err(e) => {
                tracing::warn!(
                    "invalid parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
                None
            }
        };
        let entry = RegisteredTool { tool, validator };
        match self
            .tools
            .iter()
            .position(|t| t.tool.name() == entry.tool.name())
        {
            Some(i) => self.tools[i] = entry,
            None => self.tools.push(entry),
        }
    }

    /// Inject the explore sub-agent callback, breaking the circular
    /// dependency between the tools and agent layers.
    pub fn set_explore_fn(&mut self, func: ExploreFn) {
        if self.tools.iter().any(|t| t.tool.name() == "explore") {
            self.register(Arc::new(ExploreTool::new(func)));
        }
    }

    /// Inject the task-list callbacks owned by the agent.
    pub fn set_task_callbacks(&mut self, callbacks: TaskCallbacks) {
        if self.tools.iter().any(|t| t.tool.name() == "write_tasks") {
            self.register(Arc::new(WriteTasksTool::new(callbacks.clone())));
            self.register(Arc::new(UpdateTaskTool::new(callbacks.clone())));
            self.register(Arc::new(ReadTasksTool::new(callbacks)));
        }
    }

    /// Run a tool by name. Unknown names and schema violations are
    /// recoverable errors reported to the model.
    pub async fn execute(
        &self,
        name: &str,
        raw_args: &str,
        cancel: CancellationToken,
    ) -> ToolOutcome {
        let entry = self
            .tools
            .iter()
            .find(|t| t.tool.name() == name)
            .ok_or_else(|| ToolError::msg(format!("unknown tool: {}", name)))?;

        let args: serde_json::Value = serde_json::from_str(raw_args)
            .map_err(|e| ToolError::msg(format!("invalid input: {}", e)))?;
        if let Some(validator) = &entry.validator {
            if let Some(errors) = validation_errors(validator, &args) {
                return Err(ToolError::msg(format!(
                    "Tool argument validation failed:\n{}",
                    errors
                )));
            }
        }

        entry.tool.execute(raw_args, cancel).await
    }

    /// Tool definitions in insertion order
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools
            .iter()
            .map(|t| {
                ToolDef::new(
                    t.tool.name(),
                    t.tool.description(),
                    t.tool.parameters_schema(),
                )
            })
            .collect()
    }

    /// Whether the named tool performs no filesystem writes.
    /// Unknown names are not read-only.
    pub fn is_read_only(&self, name: &str) -> bool {
        self.tools
            .iter()
            .find(|t| t.tool.name() == name)
            .map(|t| t.tool.read_only())
            .unwrap_or(false)
    }
}

fn validation_errors(validator: &jsonschema::Validator, args: &serde_json::Value) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(errors.join("\n"))
    }
}

/// Parse raw JSON tool input into a typed struct
pub(crate) fn parse_input<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, ToolError> {
    serde_json::from_str(raw).map_err(|e| ToolError::msg(format!("invalid input: {}", e)))
}
