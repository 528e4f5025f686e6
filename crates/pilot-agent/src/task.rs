//! The agent-owned task list.
//!
//! Lives outside the conversation history so it survives compaction; the
//! task tools reach it through callbacks holding a cloned [`TaskStore`].

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pilot_tools::TaskInput;
use serde::{Deserialize, Serialize};

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A tracked work item created by the model for planning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    /// Imperative title: "Add auth middleware"
    pub content: String,
    #[serde(default)]
    pub description: String,
    /// Continuous form: "Adding auth middleware"
    #[serde(default)]
    pub active_form: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Shared handle to the task list
#[derive(Clone, Default)]
pub struct TaskStore {
    inner: Arc<Mutex<Vec<Task>>>,
}

impl TaskStore {
    /// Replace the entire list, assigning sequential ids from 1 with all
    /// statuses pending. Returns the formatted summary.
    pub fn write(&self, inputs: Vec<TaskInput>) -> String {
        let now = Utc::now();
        let tasks: Vec<Task> = inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| Task {
                id: i as u64 + 1,
                content: input.content,
                description: input.description,
                active_form: input.active_form,
                status: TaskStatus::Pending,
                created_at: now,
                updated_at: now,
            })
            .collect();
        *self.inner.lock() = tasks;
        self.summary()
    }

    /// Set one task's status
    pub fn update(&self, id: u64, status: &str) -> Result<(), String> {
        let status = TaskStatus::parse(status).ok_or_else(|| {
            format!(
                "invalid status {:?} (must be pending, in_progress, or completed)",
                status
            )
        })?;
        let mut tasks = self.inner.lock();
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.status = status;
                task.updated_at = Utc::now();
                Ok(())
            }
            None => Err(format!("task {} not found", id)),
        }
    }

    /// Formatted text summary of all tasks
    pub fn summary(&self) -> String {
        let tasks = self.inner.lock();
        if tasks.is_empty() {
            return "No tasks.".to_string();
        }

        let mut out = String::new();
        let (mut pending, mut in_progress, mut completed) = (0, 0, 0);
        for task in tasks.iter() {
            let marker = match task.status {
                TaskStatus::Pending => {
                    pending += 1;
                    " "
                }
                TaskStatus::InProgress => {
                    in_progress += 1;
                    "~"
                }
                TaskStatus::Completed => {
                    completed += 1;
                    "x"
                }
            };
            let _ = writeln!(out, "  [{}] {}. {}", marker, task.id, task.content);
        }
        let _ = write!(
            out,
            "\n{} tasks ({} pending, {} in progress, {} completed)",
            tasks.len(),
            pending,
            in_progress,
            completed
        );
        out
    }

    /// Copy of the current list, for session persistence
    pub fn snapshot(&self) -> Vec<Task> {
        self.inner.lock().clone()
    }

    /// Replace the list from a restored session
    pub fn restore(&self, tasks: Vec<Task>) {
        *self.inner.lock() = tasks;
    }
}
