//! Workspace sandbox: path confinement for all file-system tools.
//!
//! Every tool path is resolved relative to a fixed root; the resolved
//! absolute path must remain inside that root. Escape attempts (`..`,
//! absolute paths, symlinks pointing outside) fail closed with an
//! access-denied error — never truncated, never silently redirected.

use std::path::{Component, Path, PathBuf};

use crate::error::{EngineError, Result};

/// A directory that file-system tools may not leave.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Open (creating if needed) the sandbox root. The stored root is
    /// canonicalized once so later containment checks compare like with
    /// like.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a tool-supplied relative path to an absolute path inside
    /// the root. The target itself may not exist yet (inserts create
    /// files), so containment is checked against the deepest existing
    /// ancestor after symlink resolution.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let requested = Path::new(relative);

        if requested.is_absolute() {
            return Err(self.deny(relative, "absolute paths are not allowed"));
        }
        for component in requested.components() {
            match component {
                Component::ParentDir => {
                    return Err(self.deny(relative, "parent-directory traversal"));
                }
                Component::Prefix(_) | Component::RootDir => {
                    return Err(self.deny(relative, "absolute paths are not allowed"));
                }
                Component::CurDir | Component::Normal(_) => {}
            }
        }

        let joined = self.root.join(requested);

        // Symlinks inside the tree can still point outside the root.
        let anchor = deepest_existing(&joined);
        let resolved = anchor.canonicalize()?;
        if !resolved.starts_with(&self.root) {
            return Err(self.deny(relative, "resolved outside the workspace root"));
        }

        Ok(joined)
    }

    fn deny(&self, relative: &str, reason: &str) -> EngineError {
        tracing::warn!(
            path = relative,
            root = %self.root.display(),
            reason,
            "workspace escape attempt denied"
        );
        EngineError::AccessDenied(format!("path '{}' {}", relative, reason))
    }
}

/// Walk up from `path` to the deepest component that exists on disk.
fn deepest_existing(path: &Path) -> PathBuf {
    let mut current = path;
    while !current.exists() {
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    current.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Workspace) {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        (tmp, ws)
    }

    #[test]
    fn test_plain_relative_path_resolves() {
        let (_tmp, ws) = workspace();
        std::fs::write(ws.root().join("notes.txt"), "hi").unwrap();
        let resolved = ws.resolve("notes.txt").unwrap();
        assert!(resolved.starts_with(ws.root()));
    }

    #[test]
    fn test_nonexistent_target_allowed_inside_root() {
        let (_tmp, ws) = workspace();
        assert!(ws.resolve("new-file.txt").is_ok());
    }

    #[test]
    fn test_parent_traversal_denied() {
        let (_tmp, ws) = workspace();
        let err = ws.resolve("../../etc/passwd").unwrap_err();
        assert!(matches!(err, EngineError::AccessDenied(_)));
    }

    #[test]
    fn test_embedded_parent_traversal_denied() {
        let (_tmp, ws) = workspace();
        let err = ws.resolve("docs/../../escape.txt").unwrap_err();
        assert!(matches!(err, EngineError::AccessDenied(_)));
    }

    #[test]
    fn test_absolute_path_denied() {
        let (_tmp, ws) = workspace();
        let err = ws.resolve("/etc/passwd").unwrap_err();
        assert!(matches!(err, EngineError::AccessDenied(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_denied() {
        let (_tmp, ws) = workspace();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), ws.root().join("link")).unwrap();

        let err = ws.resolve("link/secret.txt").unwrap_err();
        assert!(matches!(err, EngineError::AccessDenied(_)));
    }
}
