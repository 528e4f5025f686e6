//! Path confinement and atomic writes.
//!
//! Every file-touching tool validates its path before any syscall and
//! performs writes atomically via temp-file-and-rename.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::registry::ToolError;

/// Resolve `requested` against `work_dir` and ensure the result stays
/// inside it.
///
/// Rejects `..` traversal, absolute paths outside the work dir, and
/// symlink escapes (the nearest existing ancestor of the target must
/// canonicalize to a location inside the canonical work dir).
pub fn validate_path(work_dir: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let outside = || {
        ToolError::msg(format!(
            "path {:?} is outside the working directory",
            requested
        ))
    };

    let requested_path = Path::new(requested);
    let joined = if requested_path.is_absolute() {
        requested_path.to_path_buf()
    } else {
        work_dir.join(requested_path)
    };

    let normalized = normalize(&joined).ok_or_else(outside)?;
    let work_dir_normalized = normalize(work_dir).ok_or_else(outside)?;
    if !normalized.starts_with(&work_dir_normalized) {
        return Err(outside());
    }

    // Lexical containment is not enough: a symlink inside the work dir can
    // point anywhere. Canonicalize the nearest existing ancestor and
    // re-check.
    if let (Ok(canonical_root), Some(canonical_ancestor)) = (
        work_dir.canonicalize(),
        canonicalize_existing_ancestor(&normalized),
    ) {
        if !canonical_ancestor.starts_with(&canonical_root) {
            return Err(outside());
        }
    }

    Ok(normalized)
}

/// Collapse `.` and `..` components without touching the filesystem.
/// Returns `None` when `..` would climb past the root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out)
}

/// Canonicalize the deepest ancestor of `path` that exists on disk.
fn canonicalize_existing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut current = path;
    loop {
        match current.canonicalize() {
            Ok(resolved) => return Some(resolved),
            Err(_) => current = current.parent()?,
        }
    }
}

/// Write `content` to `target` atomically: temp file in the same directory
/// (so the rename stays on one filesystem), write, fsync, chmod, rename.
/// On failure the temp file is removed and the target is untouched.
pub fn atomic_write(target: &Path, content: &[u8], mode: u32) -> std::io::Result<()> {
    let dir = target.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = tempfile::Builder::new()
        .prefix(".pilot-")
        .tempfile_in(dir.unwrap_or_else(|| Path::new(".")))?;

    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path_inside() {
        let dir = tempfile::tempdir().unwrap();
        let path = validate_path(dir.path(), "src/main.rs").unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(path.ends_with("src/main.rs"));
    }

    #[test]
    fn test_dot_components_collapse() {
        let dir = tempfile::tempdir().unwrap();
        let path = validate_path(dir.path(), "src/./a/../main.rs").unwrap();
        assert!(path.ends_with("src/main.rs"));
    }

    #[test]
    fn test_rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_path(dir.path(), "../../etc/passwd").is_err());
        assert!(validate_path(dir.path(), "src/../../other").is_err());
    }

    #[test]
    fn test_rejects_absolute_outside() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_path(dir.path(), "/etc/passwd").is_err());
    }

    #[test]
    fn test_accepts_absolute_inside() {
        let dir = tempfile::tempdir().unwrap();
        let inside = dir.path().join("file.txt");
        let path = validate_path(dir.path(), inside.to_str().unwrap()).unwrap();
        assert!(path.starts_with(dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        assert!(validate_path(dir.path(), "escape/secrets.txt").is_err());
    }

    #[test]
    fn test_atomic_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        atomic_write(&target, b"hello", 0o644).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");

        // No temp file remains.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".pilot-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_atomic_write_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        std::fs::write(&target, b"old").unwrap();
        atomic_write(&target, b"new contents", 0o644).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new contents");
    }

    #[test]
    fn test_failed_write_leaves_target_intact() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        std::fs::write(&target, b"original").unwrap();

        // Renaming over a directory fails after the temp write succeeded.
        let blocked = dir.path().join("blocked");
        std::fs::create_dir(&blocked).unwrap();
        assert!(atomic_write(&blocked, b"new", 0o644).is_err());

        assert_eq!(std::fs::read(&target).unwrap(), b"original");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".pilot-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
