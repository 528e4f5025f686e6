//! Task-list tools.
//!
//! The task list itself is owned by the agent; these tools hold plain
//! function references injected after registry construction, which breaks
//! the circular dependency between the tools and agent layers.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::confirm::NeedsConfirmation;
use crate::registry::{parse_input, Tool, ToolError, ToolOutcome};

/// Per-task input shape for write_tasks (no id or timestamps)
#[derive(Debug, Clone, Deserialize)]
pub struct TaskInput {
    pub content: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub active_form: String,
}

/// Callbacks into the agent-owned task list
#[derive(Clone)]
pub struct TaskCallbacks {
    /// Replace the list, returning a formatted summary
    pub write_tasks: Arc<dyn Fn(Vec<TaskInput>) -> String + Send + Sync>,
    /// Set one task's status
    pub update_task: Arc<dyn Fn(u64, &str) -> Result<(), String> + Send + Sync>,
    /// Formatted view of the current list
    pub read_tasks: Arc<dyn Fn() -> String + Send + Sync>,
}

const NOT_CONFIGURED: &str = "task callbacks not configured";

/// Tool that replaces the task list; requires confirmation with a plan preview
pub struct WriteTasksTool {
    callbacks: Option<TaskCallbacks>,
}

impl WriteTasksTool {
    pub fn new(callbacks: TaskCallbacks) -> Self {
        Self {
            callbacks: Some(callbacks),
        }
    }

    pub fn unconfigured() -> Self {
        Self { callbacks: None }
    }
}

#[derive(Deserialize)]
struct WriteTasksInput {
    tasks: Vec<TaskInput>,
}

#[async_trait]
impl Tool for WriteTasksTool {
    fn name(&self) -> &str {
        "write_tasks"
    }

    fn description(&self) -> &str {
        r#"Create or replace the task list for planning multi-step work. User confirmation required.
Each task has:
- content: short imperative title (e.g. "Add auth middleware")
- description: detailed implementation plan with files to create/modify, code patterns to follow, and what "done" looks like
- active_form: (optional) continuous form for status display

After the user approves the plan, immediately mark task 1 as in_progress and begin implementation."#
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": {
                                "type": "string",
                                "description": "Short imperative title (e.g. 'Add auth middleware')"
                            },
                            "description": {
                                "type": "string",
                                "description": "Detailed description of what needs to be done. Include enough detail for another agent to understand and complete the task: specific files to create/modify, functions to change, code patterns to follow, and acceptance criteria."
                            },
                            "active_form": {
                                "type": "string",
                                "description": "Task description in continuous form (e.g. 'Adding auth middleware')"
                            }
                        },
                        "required": ["content", "description"]
                    },
                    "description": "Array of tasks to create"
                }
            },
            "required": ["tasks"]
        })
    }

    async fn execute(&self, raw_args: &str, _cancel: CancellationToken) -> ToolOutcome {
        let params: WriteTasksInput = parse_input(raw_args)?;
        if params.tasks.is_empty() {
            return Err(ToolError::msg("tasks array is required and must not be empty"));
        }
        for (i, task) in params.tasks.iter().enumerate() {
            if task.content.is_empty() {
                return Err(ToolError::msg(format!("task {}: content is required", i + 1)));
            }
            if task.description.is_empty() {
                return Err(ToolError::msg(format!(
                    "task {}: description is required — include files to modify, implementation steps, and acceptance criteria",
                    i + 1
                )));
            }
        }
        let Some(callbacks) = self.callbacks.clone() else {
            return Err(ToolError::msg(NOT_CONFIGURED));
        };

        let preview = format_task_preview(&params.tasks);
        let tasks = params.tasks;
        Err(NeedsConfirmation::new(
            "write_tasks",
            "task plan",
            preview,
            String::new(),
            move || Box::pin(async move { Ok((callbacks.write_tasks)(tasks)) }),
        )
        .into())
    }
}

fn format_task_preview(tasks: &[TaskInput]) -> String {
    let mut out = String::new();
    for (i, task) in tasks.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", i + 1, task.content);
        if !task.description.is_empty() {
            let _ = writeln!(out, "     {}", task.description);
        }
    }
    let _ = write!(out, "\n{} tasks", tasks.len());
    out
}

/// Tool that updates one task's status
pub struct UpdateTaskTool {
    callbacks: Option<TaskCallbacks>,
}

impl UpdateTaskTool {
    pub fn new(callbacks: TaskCallbacks) -> Self {
        Self {
            callbacks: Some(callbacks),
        }
    }

    pub fn unconfigured() -> Self {
        Self { callbacks: None }
    }
}

#[derive(Deserialize)]
struct UpdateTaskInput {
    id: u64,
    status: String,
}

#[async_trait]
impl Tool for UpdateTaskTool {
    fn name(&self) -> &str {
        "update_task"
    }

    fn description(&self) -> &str {
        "Update the status of a task by ID. Valid statuses: pending, in_progress, completed. Mark tasks in_progress when you start working on them and completed when done. Returns the updated task list."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "integer",
                    "description": "Task ID to update"
                },
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "completed"],
                    "description": "New status for the task"
                }
            },
            "required": ["id", "status"]
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, raw_args: &str, _cancel: CancellationToken) -> ToolOutcome {
        let params: UpdateTaskInput = parse_input(raw_args)?;
        if params.id == 0 {
            return Err(ToolError::msg("id is required"));
        }
        if params.status.is_empty() {
            return Err(ToolError::msg("status is required"));
        }
        let Some(callbacks) = &self.callbacks else {
            return Err(ToolError::msg(NOT_CONFIGURED));
        };
        (callbacks.update_task)(params.id, &params.status).map_err(ToolError::Recoverable)?;
        Ok((callbacks.read_tasks)())
    }
}

/// Tool that returns the formatted task list
pub struct ReadTasksTool {
    callbacks: Option<TaskCallbacks>,
}

impl ReadTasksTool {
    pub fn new(callbacks: TaskCallbacks) -> Self {
        Self {
            callbacks: Some(callbacks),
        }
    }

    pub fn unconfigured() -> Self {
        Self { callbacks: None }
    }
}

#[async_trait]
impl Tool for ReadTasksTool {
    fn name(&self) -> &str {
        "read_tasks"
    }

    fn description(&self) -> &str {
        "Read the current task list. Task state is already in your system prompt at the start of each turn — you rarely need this tool. Only useful after many turns of work when context may have been compacted."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, _raw_args: &str, _cancel: CancellationToken) -> ToolOutcome {
        let Some(callbacks) = &self.callbacks else {
            return Err(ToolError::msg(NOT_CONFIGURED));
        };
        let list = (callbacks.read_tasks)();
        Ok(format!(
            "{}\n\n(Note: task state is already in your system prompt. update_task also returns the current list. You rarely need read_tasks.)",
            list
        ))
    }
}
