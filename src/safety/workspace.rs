use std::path::{Component, Path, PathBuf};

use crate::error::GuardrailError;

/// Enforces workspace-scoped write access.
///
/// Reads are unrestricted; writes must resolve to a path inside the
/// workspace root after symlinks are followed. Paths that do not exist yet
/// are allowed as long as their nearest existing ancestor is inside the
/// workspace and the pending suffix cannot climb back out.
#[derive(Debug, Clone)]
pub struct WorkspaceGuard {
    /// Canonical (absolute, symlinks resolved) workspace root.
    canonical_root: PathBuf,
}

impl WorkspaceGuard {
    /// Create a guard for the given workspace path, creating the directory
    /// if needed and resolving it to its canonical form.
    pub fn new(workspace_path: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(workspace_path)?;
        let canonical_root = std::fs::canonicalize(workspace_path)?;
        Ok(Self { canonical_root })
    }

    pub fn canonical_root(&self) -> &Path {
        &self.canonical_root
    }

    /// Anchor a possibly-relative path at the workspace root.
    pub fn anchored(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.canonical_root.join(path)
        }
    }

    /// Validate a write target and return the resolved absolute path to
    /// write to.
    ///
    /// The nearest existing ancestor is canonicalized, so a symlink inside
    /// the workspace cannot smuggle the write outside it. Components of the
    /// not-yet-existing suffix are checked lexically: a `..` there is
    /// rejected outright, since nothing on disk constrains it yet.
    pub fn resolve_write(&self, target: &Path) -> Result<PathBuf, GuardrailError> {
        let absolute = if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.canonical_root.join(target)
        };

        let (existing, suffix) = split_existing_prefix(&absolute);

        let mut resolved = std::fs::canonicalize(&existing).map_err(|_| {
            GuardrailError::WriteOutsideWorkspace {
                path: target.to_path_buf(),
                workspace: self.canonical_root.clone(),
            }
        })?;

        for component in suffix.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(GuardrailError::WriteOutsideWorkspace {
                        path: target.to_path_buf(),
                        workspace: self.canonical_root.clone(),
                    });
                }
            }
        }

        if resolved.starts_with(&self.canonical_root) {
            Ok(resolved)
        } else {
            Err(GuardrailError::WriteOutsideWorkspace {
                path: target.to_path_buf(),
                workspace: self.canonical_root.clone(),
            })
        }
    }
}

/// Split a path into its longest existing ancestor and the remaining
/// not-yet-created suffix.
fn split_existing_prefix(path: &Path) -> (PathBuf, PathBuf) {
    let mut existing = path.to_path_buf();
    let mut pending: Vec<std::ffi::OsString> = Vec::new();

    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                pending.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }

    let mut suffix = PathBuf::new();
    for part in pending.iter().rev() {
        suffix.push(part);
    }
    (existing, suffix)
}
