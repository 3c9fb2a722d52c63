// src/store/lock.rs

//! Advisory lock over a whole generation store
//!
//! Every command holds the lock for its full duration: exclusive for commands
//! that mutate the store or the live system, shared for read-only ones. The
//! lock is released when the guard is dropped.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Lock file name inside the store root
pub const LOCK_FILE: &str = ".lock";

/// How a command intends to use the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Held store lock
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl StoreLock {
    /// Acquire the lock, waiting for other holders to finish
    pub fn acquire(root: &Path, mode: LockMode) -> Result<Self> {
        match Self::try_acquire(root, mode)? {
            Some(lock) => Ok(lock),
            None => {
                info!("Waiting for another gensync process to release {}", root.display());
                let (file, path) = open_lock_file(root)?;
                let locked = match mode {
                    LockMode::Shared => FileExt::lock_shared(&file),
                    LockMode::Exclusive => FileExt::lock_exclusive(&file),
                };
                locked.map_err(|_| Error::LockFailed(path.clone()))?;
                Ok(Self { file, path, mode })
            }
        }
    }

    /// Acquire the lock without blocking; `None` when another process holds it
    pub fn try_acquire(root: &Path, mode: LockMode) -> Result<Option<Self>> {
        let (file, path) = open_lock_file(root)?;
        let locked = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };

        match locked {
            Ok(()) => {
                debug!("Locked {} ({:?})", path.display(), mode);
                Ok(Some(Self { file, path, mode }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(_) => Err(Error::LockFailed(path)),
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if FileExt::unlock(&self.file).is_ok() {
            debug!("Unlocked {}", self.path.display());
        }
    }
}

fn open_lock_file(root: &Path) -> Result<(File, PathBuf)> {
    let path = root.join(LOCK_FILE);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)?;
    Ok((file, path))
}
