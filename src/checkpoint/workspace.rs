//! Workspace-scoped paths.
//!
//! A [`WorkspacePath`] can only be obtained from a [`WorkspaceRoot`], either by
//! joining a relative path with no `..` components or by scoping an absolute
//! path that already lies under the root. Recursive deletion only accepts these
//! values, so it can never reach outside the workspace.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRoot {
    path: PathBuf,
    canonical: PathBuf,
}

impl WorkspaceRoot {
    /// Validate and create the workspace root directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(PipelineError::configuration(format!(
                "workspace root must be absolute, got {}",
                path.display()
            )));
        }
        let path = normalize(path);
        std::fs::create_dir_all(&path)
            .map_err(|e| PipelineError::io("create workspace root", &path, e))?;
        let canonical = path
            .canonicalize()
            .map_err(|e| PipelineError::io("resolve workspace root", &path, e))?;

        Ok(Self { path, canonical })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Join a relative path; `..`, absolute and empty paths are rejected.
    pub fn join(&self, relative: impl AsRef<Path>) -> Result<WorkspacePath> {
        let relative = relative.as_ref();
        let mut clean = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(PipelineError::checkpoint_safety(
                        self.path.join(relative),
                        &self.path,
                    ));
                }
            }
        }
        self.scoped(clean)
    }

    /// Accept an absolute path only if it lies under this root.
    pub fn scope(&self, path: impl AsRef<Path>) -> Result<WorkspacePath> {
        let path = path.as_ref();
        if path.is_relative() {
            return self.join(path);
        }
        let normalized = normalize(path);
        let relative = normalized
            .strip_prefix(&self.path)
            .or_else(|_| normalized.strip_prefix(&self.canonical))
            .map_err(|_| PipelineError::checkpoint_safety(path, &self.path))?;
        self.scoped(relative.to_path_buf())
    }

    fn scoped(&self, relative: PathBuf) -> Result<WorkspacePath> {
        if relative.as_os_str().is_empty() {
            // The root itself is never a marker.
            return Err(PipelineError::checkpoint_safety(&self.path, &self.path));
        }
        Ok(WorkspacePath {
            absolute: self.path.join(&relative),
            root: self.clone(),
            relative,
        })
    }
}

/// A path proven to lie strictly under a [`WorkspaceRoot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePath {
    root: WorkspaceRoot,
    relative: PathBuf,
    absolute: PathBuf,
}

impl WorkspacePath {
    pub fn as_path(&self) -> &Path {
        &self.absolute
    }

    pub fn relative(&self) -> &Path {
        &self.relative
    }

    pub fn root(&self) -> &WorkspaceRoot {
        &self.root
    }

    pub fn join(&self, relative: impl AsRef<Path>) -> Result<WorkspacePath> {
        self.root.join(self.relative.join(relative.as_ref()))
    }

    /// Resolve symlinks in the marker's parent and check the result is still
    /// under the root. Lexical scoping alone cannot see a linked directory.
    pub fn ensure_resolves_under_root(&self) -> Result<()> {
        let Some(parent) = self.absolute.parent() else {
            return Err(PipelineError::checkpoint_safety(&self.absolute, &self.root.path));
        };
        let resolved = parent
            .canonicalize()
            .map_err(|e| PipelineError::io("resolve marker parent", parent, e))?;
        if !resolved.starts_with(&self.root.canonical) {
            return Err(PipelineError::checkpoint_safety(resolved.join(&self.relative), &self.root.path));
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        // symlink_metadata so a dangling link still counts as existing output
        self.absolute.symlink_metadata().is_ok()
    }
}

impl AsRef<Path> for WorkspacePath {
    fn as_ref(&self) -> &Path {
        &self.absolute
    }
}

impl fmt::Display for WorkspacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.absolute.display())
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
