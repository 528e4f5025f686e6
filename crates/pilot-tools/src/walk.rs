//! Directory traversal shared by the search tools

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

/// Directories skipped during traversal: large, generated, or
/// version-control trees that are useless for code search.
const SKIP_DIRS: &[&str] = &[".git", "node_modules", ".venv", "__pycache__"];

pub(crate) fn should_skip_dir(name: &str) -> bool {
    SKIP_DIRS.contains(&name)
}

/// Collect all regular files under `root`, depth-first, skipping ignored
/// directories and symlinked directories. Unreadable entries are skipped.
/// Stops early when `cancel` fires.
pub(crate) fn walk_files(root: &Path, cancel: &CancellationToken) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        if cancel.is_cancelled() {
            break;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                let name = entry.file_name();
                if !should_skip_dir(&name.to_string_lossy()) {
                    stack.push(path);
                }
            } else if file_type.is_file() {
                files.push(path);
            }
            // Symlinks are skipped entirely: a symlinked directory could
            // walk outside the sandbox.
        }
    }

    files
}
