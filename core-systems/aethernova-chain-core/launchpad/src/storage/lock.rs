//! Exclusive advisory lock on a data directory.
//!
//! A `launchpad.lock` file in the directory carries an OS file lock. Every
//! process that loads, mutates and saves the same store takes it first, so
//! read-modify-write cycles never interleave.

use std::{
    fs::File,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use fs4::FileExt;
use tracing::{debug, warn};

use super::StorageError;

const LOCK_FILE: &str = "launchpad.lock";

/// Held lock. Released on drop.
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Wait until the lock on `dir` is ours.
    pub async fn acquire(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let (file, path) = Self::open(dir.as_ref()).await?;
        let file = tokio::task::spawn_blocking(move || FileExt::lock_exclusive(&file).map(|()| file))
            .await
            .map_err(|e| StorageError::Other(format!("lock task: {e}")))??;
        debug!(path = %path.display(), "data dir locked");
        Ok(Self { file, path })
    }

    /// Take the lock without waiting; `StorageError::Locked` if it is held.
    pub async fn try_acquire(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let (file, path) = Self::open(dir.as_ref()).await?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(path = %path.display(), "data dir locked");
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(StorageError::Locked(path)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(dir: &Path) -> Result<(File, PathBuf), StorageError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(LOCK_FILE);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .await?
            .into_std()
            .await;
        Ok((file, path))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "unlock failed");
        }
    }
}
