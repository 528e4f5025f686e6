//! Per-turn checkpoints and rewind.
//!
//! A checkpoint records the conversation length and the on-disk bytes of
//! every touched file at the start of a turn. The file-originals map
//! separately records each file's pre-session state the first time it is
//! modified; rewinding past a file's first modification delegates to it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pilot_ai::Message;

use crate::agent::Agent;
use crate::compaction::{compaction_prompt, serialize_history};
use crate::error::{Error, Result};
use crate::ui::Ui;

/// A file's state before its first modification in this session
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub existed: bool,
    /// Content before first modification; `None` when it did not exist
    pub content: Option<Vec<u8>>,
}

/// Conversation and file state captured at the start of a user turn
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// 1-based turn number
    pub turn: usize,
    pub timestamp: DateTime<Utc>,
    /// User message, truncated to 100 chars
    pub preview: String,
    /// History length at capture time
    pub msg_index: usize,
    /// Path -> bytes at this checkpoint; `None` means the file did not exist
    pub files: HashMap<PathBuf, Option<Vec<u8>>>,
}

/// Lightweight checkpoint view for UI display
#[derive(Debug, Clone)]
pub struct CheckpointItem {
    pub turn: usize,
    pub timestamp: DateTime<Utc>,
    pub preview: String,
}

fn truncate_preview(text: &str) -> String {
    text.chars().take(100).collect()
}

impl Agent {
    /// Save a checkpoint before a user turn begins.
    ///
    /// Snapshots the current disk content of every file the session has
    /// touched so far.
    pub fn create_checkpoint(&mut self, user_message: &str) {
        let mut files = HashMap::with_capacity(self.file_originals.len());
        for path in self.file_originals.keys() {
            files.insert(path.clone(), std::fs::read(path).ok());
        }

        self.checkpoints.push(Checkpoint {
            turn: self.checkpoints.len() + 1,
            timestamp: Utc::now(),
            preview: truncate_preview(user_message),
            msg_index: self.messages.len(),
            files,
        });
    }

    /// Record a file's pre-session state the first time it is about to be
    /// modified. Later calls for the same path are no-ops.
    pub(crate) fn capture_file_before_modification(&mut self, path: &str) {
        let abs = self.resolve_path(path);
        if self.file_originals.contains_key(&abs) {
            return;
        }
        let snapshot = match std::fs::read(&abs) {
            Ok(content) => FileSnapshot {
                existed: true,
                content: Some(content),
            },
            Err(_) => FileSnapshot {
                existed: false,
                content: None,
            },
        };
        self.file_originals.insert(abs, snapshot);
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.work_dir.join(p)
        }
    }

    /// Lightweight list of all checkpoints for UI display
    pub fn checkpoints(&self) -> Vec<CheckpointItem> {
        self.checkpoints
            .iter()
            .map(|cp| CheckpointItem {
                turn: cp.turn,
                timestamp: cp.timestamp,
                preview: cp.preview.clone(),
            })
            .collect()
    }

    /// Truncate messages and checkpoints back to the given turn
    pub fn rewind_conversation(&mut self, turn: usize) {
        if turn < 1 || turn > self.checkpoints.len() {
            return;
        }
        let cp = &self.checkpoints[turn - 1];
        self.messages.truncate(cp.msg_index);
        self.checkpoints.truncate(turn - 1);
        self.last_tokens_used = 0;
    }

    /// Restore files to their state at the given checkpoint.
    ///
    /// Best-effort across files: the first failure is surfaced and later
    /// restores are skipped; a retry is idempotent.
    pub fn rewind_code(&mut self, turn: usize) -> Result<()> {
        if turn < 1 || turn > self.checkpoints.len() {
            return Err(Error::InvalidCheckpoint(turn));
        }
        let cp = self.checkpoints[turn - 1].clone();

        // Files present in the checkpoint snapshot go back to those bytes.
        for (path, content) in &cp.files {
            match content {
                None => {
                    let _ = std::fs::remove_file(path);
                }
                Some(bytes) => {
                    std::fs::write(path, bytes)
                        .map_err(|e| Error::Session(format!("restore {}: {}", path.display(), e)))?;
                }
            }
        }

        // Files first modified after this checkpoint go back to their
        // pre-session state.
        for (path, snapshot) in &self.file_originals {
            if cp.files.contains_key(path) {
                continue;
            }
            if !snapshot.existed {
                let _ = std::fs::remove_file(path);
            } else if let Some(bytes) = &snapshot.content {
                std::fs::write(path, bytes).map_err(|e| {
                    Error::Session(format!("restore original {}: {}", path.display(), e))
                })?;
            }
        }

        // Only paths in the checkpoint can still differ from pre-session
        // state; drop originals for everything else.
        self.file_originals.retain(|path, _| cp.files.contains_key(path));

        Ok(())
    }

    /// Restore both code and conversation
    pub fn rewind_all(&mut self, turn: usize) -> Result<()> {
        self.rewind_code(turn)?;
        self.rewind_conversation(turn);
        Ok(())
    }

    /// Keep messages before the checkpoint and replace everything after it
    /// with an LLM-generated summary.
    pub async fn summarize_from(
        &mut self,
        cancel: &tokio_util::sync::CancellationToken,
        turn: usize,
        ui: &dyn Ui,
    ) -> Result<()> {
        if turn < 1 || turn > self.checkpoints.len() {
            return Err(Error::InvalidCheckpoint(turn));
        }
        let msg_index = self.checkpoints[turn - 1].msg_index;

        if msg_index >= self.messages.len() {
            ui.print_warning("Nothing to summarize after this checkpoint.");
            return Ok(());
        }

        let history = serialize_history(&self.messages[msg_index..]);
        let compact_messages = vec![
            Message::system(compaction_prompt()),
            Message::user(history),
        ];

        ui.print_warning("Summarizing from checkpoint...");
        let resp = self
            .client()
            .send(cancel, &compact_messages, &[])
            .await
            .map_err(|e| Error::Session(format!("summarization failed: {}", e)))?;
        let summary = resp.message.content_str().to_string();

        self.messages.truncate(msg_index);
        if !summary.is_empty() {
            self.messages.push(Message::user(format!(
                "[Conversation summarized] Here is a summary of what happened:\n\n{}",
                summary
            )));
        }

        self.checkpoints.truncate(turn - 1);
        self.last_tokens_used = 0;
        ui.print_warning("Summarized successfully.");
        Ok(())
    }

    /// Rebuild conversation-only checkpoint stubs from restored user
    /// messages. Resumed sessions cannot rewind code, so no file snapshots.
    pub(crate) fn rebuild_checkpoints(&mut self) {
        self.checkpoints.clear();
        for (i, msg) in self.messages.iter().enumerate() {
            if i == 0 {
                continue;
            }
            if msg.role == pilot_ai::Role::User && msg.tool_call_id.is_none() {
                self.checkpoints.push(Checkpoint {
                    turn: self.checkpoints.len() + 1,
                    timestamp: Utc::now(),
                    preview: truncate_preview(msg.content_str()),
                    msg_index: i,
                    files: HashMap::new(),
                });
            }
        }
    }
}
