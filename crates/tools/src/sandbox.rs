//! Path sandboxing — every file-touching tool stays under one root.
//!
//! Relative paths resolve against the root; absolute paths must already
//! point inside it. Symlinks are resolved before the containment check.

use cellpilot_core::error::ToolError;
use std::path::{Component, Path, PathBuf};

/// A filesystem root that tools may not escape.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Create a sandbox rooted at `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|e| {
            ToolError::SandboxViolation(format!("root '{}' is not usable: {e}", root.display()))
        })?;
        if !canonical.is_dir() {
            return Err(ToolError::SandboxViolation(format!(
                "root '{}' is not a directory",
                root.display()
            )));
        }
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` to an absolute path inside the root.
    ///
    /// The target does not have to exist, but its parent must (when it is
    /// not the root itself), so that symlinks can be resolved.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let raw = Path::new(path.trim());
        if raw.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ToolError::SandboxViolation(format!(
                "path traversal detected in '{path}'"
            )));
        }

        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root.join(raw)
        };

        let canonical = if joined.exists() {
            joined
                .canonicalize()
                .map_err(|e| ToolError::SandboxViolation(format!("cannot resolve '{path}': {e}")))?
        } else if let Some(parent) = joined.parent().filter(|p| p.exists()) {
            let parent = parent.canonicalize().map_err(|e| {
                ToolError::SandboxViolation(format!("cannot resolve parent of '{path}': {e}"))
            })?;
            parent.join(joined.file_name().unwrap_or_default())
        } else {
            joined
        };

        if !canonical.starts_with(&self.root) {
            return Err(ToolError::SandboxViolation(format!(
                "'{path}' is outside the workspace root"
            )));
        }
        Ok(canonical)
    }

    /// `path` relative to the root, with forward slashes, for display.
    pub fn display_relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let shown = rel.to_string_lossy().replace('\\', "/");
        if shown.is_empty() { ".".into() } else { shown }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_resolve_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();

        let resolved = sandbox.resolve("a.txt").unwrap();
        assert!(resolved.starts_with(sandbox.root()));
        assert_eq!(sandbox.display_relative(&resolved), "a.txt");

        // Not-yet-existing files are fine when their parent exists.
        let new_file = sandbox.resolve("new.ipynb").unwrap();
        assert!(new_file.ends_with("new.ipynb"));
    }

    #[test]
    fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        let err = sandbox.resolve("../../etc/passwd").unwrap_err();
        assert!(matches!(err, ToolError::SandboxViolation(_)));
    }

    #[test]
    fn absolute_path_outside_root_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        std::fs::write(elsewhere.path().join("secret.txt"), "x").unwrap();

        let sandbox = Sandbox::new(root.path()).unwrap();
        let outside = elsewhere.path().join("secret.txt");
        let err = sandbox.resolve(outside.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ToolError::SandboxViolation(_)));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(elsewhere.path(), root.path().join("link")).unwrap();

        let sandbox = Sandbox::new(root.path()).unwrap();
        assert!(sandbox.resolve("link").is_err());
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(Sandbox::new("/definitely/not/here").is_err());
    }

    #[test]
    fn root_displays_as_dot() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        let root = sandbox.resolve(".").unwrap();
        assert_eq!(sandbox.display_relative(&root), ".");
    }
}
