//! # Checkpoint Store
//!
//! Filesystem-marker idempotency. A step's output file or directory existing
//! under the workspace root is the whole persisted state of "already done";
//! there is no separate state database.
//!
//! ```rust,no_run
//! use geo_pipeline::checkpoint::{CheckpointStore, WorkspaceRoot};
//!
//! # fn main() -> geo_pipeline::error::Result<()> {
//! let root = WorkspaceRoot::new("/work/TZA")?;
//! let store = CheckpointStore::new(root.clone(), false);
//! let marker = root.join("rasters/year1.tif")?;
//! if !store.check_done(&marker)? {
//!     // produce rasters/year1.tif
//! }
//! # Ok(())
//! # }
//! ```

mod workspace;

pub use workspace::{WorkspacePath, WorkspaceRoot};

use std::fs;
use std::io::ErrorKind;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: WorkspaceRoot,
    clean: bool,
}

impl CheckpointStore {
    pub fn new(root: WorkspaceRoot, clean: bool) -> Self {
        Self { root, clean }
    }

    pub fn root(&self) -> &WorkspaceRoot {
        &self.root
    }

    pub fn clean(&self) -> bool {
        self.clean
    }

    pub fn with_clean(&self, clean: bool) -> Self {
        Self {
            root: self.root.clone(),
            clean,
        }
    }

    /// Build a marker path relative to the workspace root.
    pub fn marker(&self, relative: impl AsRef<std::path::Path>) -> Result<WorkspacePath> {
        self.root.join(relative)
    }

    /// Returns true when the marker's output already exists and the step should
    /// be skipped. With the clean flag set the marker is removed first. When the
    /// step should run, the marker's parent directories are created; the marker
    /// itself is left for the step to produce.
    pub fn check_done(&self, marker: &WorkspacePath) -> Result<bool> {
        if marker.root() != &self.root {
            return Err(PipelineError::checkpoint_safety(
                marker.as_path(),
                self.root.path(),
            ));
        }

        if self.clean {
            remove_marker(marker)?;
        }

        if marker.exists() {
            info!("{} exists, no need to perform step", marker);
            return Ok(true);
        }

        if let Some(parent) = marker.as_path().parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PipelineError::io("create marker parent", parent, e))?;
        }

        Ok(false)
    }

    /// Like [`check_done`](Self::check_done) for steps whose output is a
    /// directory: when the step should run the directory is created empty.
    pub fn check_done_dir(&self, marker: &WorkspacePath) -> Result<bool> {
        if self.check_done(marker)? {
            return Ok(true);
        }
        fs::create_dir_all(marker.as_path())
            .map_err(|e| PipelineError::io("create output directory", marker.as_path(), e))?;
        Ok(false)
    }
}

/// Delete a marker file or directory tree. Returns whether anything was removed.
pub fn remove_marker(marker: &WorkspacePath) -> Result<bool> {
    let path = marker.as_path();
    let metadata = match path.symlink_metadata() {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(PipelineError::io("inspect marker", path, e)),
    };

    marker.ensure_resolves_under_root()?;
    debug!("Removing checkpoint marker {}", marker);

    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|e| PipelineError::io("remove marker", path, e))?;

    if marker.exists() {
        return Err(PipelineError::io(
            "remove marker",
            path,
            std::io::Error::new(ErrorKind::Other, "path still exists after removal"),
        ));
    }
    Ok(true)
}
