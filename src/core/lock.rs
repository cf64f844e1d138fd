//! Cross-process exclusion for a data directory.
//!
//! Only one process may drive a given state store at a time. The lock is an
//! advisory `flock` on `<home>/.lock`, released when the guard is dropped or
//! the process exits.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use super::state_store::StoreError;

/// Name of the lock file inside the data directory
pub const LOCK_FILE: &str = ".lock";

/// Held exclusive lock on a data directory
#[derive(Debug)]
pub struct DataDirLock {
    file: File,
    path: PathBuf,
}

impl DataDirLock {
    /// Take the lock without blocking; fails if another process holds it
    pub fn acquire(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(LOCK_FILE);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        file.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(data_dir.to_path_buf()))?;

        debug!(path = %path.display(), "Acquired data directory lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        // Closing the file releases the lock too
        let _ = self.file.unlock();
    }
}
