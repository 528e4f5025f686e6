//! pilot-tools: tool registry and implementations for file operations,
//! shell execution, and codebase exploration, with path sandboxing.
//!
//! Side-effectful tools (write, edit, bash, write_tasks) do not act when
//! executed; they return a [`NeedsConfirmation`] carrying a preview and an
//! executable closure, which the orchestrator runs after user approval.

mod bash;
mod confirm;
mod edit;
mod explore;
mod glob_tool;
mod grep;
mod ls;
pub mod path;
mod read;
mod registry;
mod task;
mod walk;
mod write;

pub use bash::BashTool;
pub use confirm::{ExecuteFuture, NeedsConfirmation};
pub use edit::EditTool;
pub use explore::{ExploreFn, ExploreTool};
pub use glob_tool::GlobTool;
pub use grep::GrepTool;
pub use ls::LsTool;
pub use path::{atomic_write, validate_path};
pub use read::ReadTool;
pub use registry::{Registry, Tool, ToolError, ToolOutcome};
pub use task::{ReadTasksTool, TaskCallbacks, TaskInput, UpdateTaskTool, WriteTasksTool};
pub use write::WriteTool;
