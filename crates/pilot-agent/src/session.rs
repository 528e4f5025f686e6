//! Session persistence.
//!
//! One JSON document per session, stored per project under
//! `~/.pilot/projects/<hash>/sessions/`, where the hash keys the absolute
//! working directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pilot_ai::{Message, Role};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::agent::Agent;
use crate::error::{Error, Result};
use crate::task::Task;

/// Metadata about a saved session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub preview: String,
    pub msg_count: usize,
}

/// On-disk representation of a session
#[derive(Serialize, Deserialize)]
pub struct SessionFile {
    pub meta: SessionMeta,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,
}

/// Session id: local timestamp plus 8 hex chars of entropy
pub(crate) fn generate_session_id() -> String {
    let entropy: u32 = rand::thread_rng().gen();
    format!(
        "{}-{:08x}",
        chrono::Local::now().format("%Y%m%d-%H%M%S"),
        entropy
    )
}

/// Deterministic 16-hex-char hash of the absolute work dir, isolating each
/// project's sessions under the global `~/.pilot/` directory.
fn project_hash(work_dir: &Path) -> String {
    let abs = std::path::absolute(work_dir).unwrap_or_else(|_| work_dir.to_path_buf());
    let digest = Sha256::digest(abs.to_string_lossy().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// The sessions directory for a project:
/// `<home>/.pilot/projects/<hash>/sessions`
pub fn sessions_dir(work_dir: &Path) -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::Session("resolve home directory".to_string()))?;
    Ok(home
        .join(".pilot")
        .join("projects")
        .join(project_hash(work_dir))
        .join("sessions"))
}

impl Agent {
    fn sessions_root(&self) -> Result<PathBuf> {
        match &self.sessions_root {
            Some(root) => Ok(root.clone()),
            None => sessions_dir(&self.work_dir),
        }
    }

    /// Persist the current conversation (excluding the system prompt).
    /// Callers should treat failures as non-fatal.
    pub fn save_session(&self) -> Result<()> {
        // Nothing worth saving yet.
        if self.messages.len() <= 1 {
            return Ok(());
        }

        let dir = self.sessions_root()?;
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Session(format!("create sessions dir: {}", e)))?;

        let preview = self
            .messages
            .iter()
            .find(|m| m.role == Role::User && !m.content_str().is_empty())
            .map(|m| m.content_str().chars().take(100).collect())
            .unwrap_or_default();

        let saved = &self.messages[1..];
        let file = SessionFile {
            meta: SessionMeta {
                id: self.session_id.clone(),
                created_at: self.session_created,
                updated_at: Utc::now(),
                preview,
                msg_count: saved.len(),
            },
            messages: saved.to_vec(),
            tasks: self.tasks.snapshot(),
        };

        let data = serde_json::to_vec(&file)
            .map_err(|e| Error::Session(format!("marshal session: {}", e)))?;
        let path = dir.join(format!("{}.json", self.session_id));
        pilot_tools::atomic_write(&path, &data, 0o644)
            .map_err(|e| Error::Session(format!("write session: {}", e)))?;
        Ok(())
    }

    /// Load a saved session, rebuilding the history with a fresh system
    /// prompt in front of the saved messages.
    pub fn resume_session(&mut self, session_id: &str) -> Result<()> {
        let dir = self.sessions_root()?;
        let path = dir.join(format!("{}.json", session_id));
        let data = std::fs::read(&path)
            .map_err(|e| Error::Session(format!("read session: {}", e)))?;
        let file: SessionFile = serde_json::from_slice(&data)
            .map_err(|e| Error::Session(format!("parse session: {}", e)))?;

        self.messages = Vec::with_capacity(1 + file.messages.len());
        self.messages
            .push(Message::system(crate::agent::build_system_prompt(
                &self.work_dir,
            )));
        self.messages.extend(file.messages);
        self.session_id = file.meta.id;
        self.session_created = file.meta.created_at;
        self.tasks.restore(file.tasks);
        self.last_tokens_used = 0;
        self.rebuild_checkpoints();
        Ok(())
    }
}

/// All sessions for a project, newest first, capped at `max` when nonzero
pub fn list_sessions(work_dir: &Path, max: usize) -> Result<Vec<SessionMeta>> {
    list_sessions_in(&sessions_dir(work_dir)?, max)
}

pub(crate) fn list_sessions_in(dir: &Path, max: usize) -> Result<Vec<SessionMeta>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };

    let mut metas: Vec<SessionMeta> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(data) = std::fs::read(&path) else {
            continue;
        };
        let Ok(file) = serde_json::from_slice::<SessionFile>(&data) else {
            continue;
        };
        metas.push(file.meta);
    }

    metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    if max > 0 && metas.len() > max {
        metas.truncate(max);
    }
    Ok(metas)
}
