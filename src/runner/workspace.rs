//! Run-scoped workspace directories.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use super::RunnerError;
use crate::files::{create_private_dir, create_private_dir_all};

/// A uniquely named, owner-only directory holding one task's files.
///
/// The directory is removed by [`Workspace::release`] or, failing that, when
/// the value is dropped. Dropping covers early returns, errors and panics.
#[derive(Debug)]
pub struct Workspace {
    id: String,
    dir: PathBuf,
    released: bool,
}

impl Workspace {
    /// Allocate a fresh workspace under `root`.
    ///
    /// The directory name is a random UUID so concurrent tasks never collide
    /// and cannot predict each other's paths.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::WorkspaceAllocation`] if `root` or the workspace
    /// directory cannot be created.
    pub async fn allocate(root: &Path) -> Result<Self, RunnerError> {
        create_private_dir_all(root)
            .await
            .map_err(|source| RunnerError::WorkspaceAllocation {
                path: root.to_path_buf(),
                source,
            })?;

        let id = Uuid::new_v4().to_string();
        let dir = root.join(&id);
        create_private_dir(&dir)
            .await
            .map_err(|source| RunnerError::WorkspaceAllocation {
                path: dir.clone(),
                source,
            })?;

        debug!(workspace = %dir.display(), "workspace allocated");
        Ok(Self {
            id,
            dir,
            released: false,
        })
    }

    /// Random identifier naming this workspace.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Absolute path of the workspace directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the directory has already been removed.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Recursively remove the workspace directory.
    ///
    /// Idempotent: releasing twice, or releasing a directory someone else
    /// already removed, succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Destroy`] if the tree cannot be removed. The
    /// guard then retries on drop.
    pub async fn release(&mut self) -> Result<(), RunnerError> {
        if self.released {
            return Ok(());
        }
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(RunnerError::Destroy {
                    path: self.dir.clone(),
                    source,
                })
            }
        }
        self.released = true;
        debug!(workspace = %self.dir.display(), "workspace removed");
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(workspace = %self.dir.display(), "workspace removed on drop"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                workspace = %self.dir.display(),
                error = %e,
                "failed to remove workspace on drop"
            ),
        }
    }
}
