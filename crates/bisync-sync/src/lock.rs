//! Session lock file
//!
//! The lock is a file created with create-exclusive semantics that holds
//! the owning process ID. A second run against the same session fails with
//! "prior lock file found" until the first run releases it. A lock left
//! behind by a killed process must be removed by hand.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::BisyncError;

/// A held session lock; released explicitly or on drop
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    released: bool,
}

impl LockFile {
    /// Creates the lock file, failing if it already exists
    pub async fn acquire(path: &Path) -> Result<Self, BisyncError> {
        let file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let owner = Self::read_pid(path).await;
                warn!(path = %path.display(), owner = ?owner, "Prior lock file found");
                return Err(BisyncError::LockHeld(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let lock = Self {
            path: path.to_path_buf(),
            released: false,
        };
        lock.write_owner(file).await
    }

    /// Records the owning PID; on failure the lock is dropped, which removes
    /// the half-written file
    async fn write_owner<W>(self, mut writer: W) -> Result<Self, BisyncError>
    where
        W: AsyncWrite + Unpin,
    {
        let pid = std::process::id();
        writer.write_all(pid.to_string().as_bytes()).await?;
        writer.flush().await?;

        info!(path = %self.path.display(), pid, "Lock acquired");
        Ok(self)
    }

    /// Reads the PID stored in a lock file, if any
    pub async fn read_pid(path: &Path) -> Option<u32> {
        tokio::fs::read_to_string(path)
            .await
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the lock file
    pub async fn release(mut self) -> Result<(), BisyncError> {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Lock released");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
                }
            }
        }
    }
}
