//! # file-lock
//!
//! Advisory, cross-process mutual exclusion scoped to a directory.
//!
//! A [`FileLock`] owns an exclusive `flock` on a `.lock` file inside the
//! directory it was acquired for. Two handles for the same directory exclude
//! each other whether they live in the same process or in different ones, so
//! separate plugin invocations on a host serialize on it.
#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// name of the lock file created inside the locked directory
pub const LOCK_FILE: &str = ".lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to create lock directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to open lock file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to acquire lock {path}: {source}")]
    Acquire { path: PathBuf, source: io::Error },
    #[error("lock acquisition task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// An exclusive advisory lock on `<dir>/.lock`.
///
/// The lock is held until [`FileLock::release`] is called or the value is
/// dropped. `release` may be called any number of times.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
}

impl FileLock {
    /// Blocks until the lock for `dir` is held. The directory is created if
    /// missing; failing to create or open it returns an error immediately.
    pub fn acquire(dir: impl AsRef<Path>) -> Result<Self, LockError> {
        let (path, file) = open(dir.as_ref())?;
        file.lock_exclusive().map_err(|source| LockError::Acquire {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "acquired file lock");
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Like [`FileLock::acquire`] but runs the blocking wait on tokio's
    /// blocking pool.
    pub async fn acquire_async(dir: impl Into<PathBuf>) -> Result<Self, LockError> {
        let dir = dir.into();
        tokio::task::spawn_blocking(move || Self::acquire(dir)).await?
    }

    /// Returns `Ok(None)` instead of waiting when another holder has the lock.
    pub fn try_acquire(dir: impl AsRef<Path>) -> Result<Option<Self>, LockError> {
        let (path, file) = open(dir.as_ref())?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "acquired file lock");
                Ok(Some(Self {
                    path,
                    file: Some(file),
                }))
            }
            Err(err) if is_contended(&err) => {
                trace!(path = %path.display(), "file lock is held elsewhere");
                Ok(None)
            }
            Err(source) => Err(LockError::Acquire { path, source }),
        }
    }

    /// path of the underlying lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Unlocks. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            // closing the descriptor drops the flock even if unlock fails
            if let Err(err) = FileExt::unlock(&file) {
                warn!(?err, path = %self.path.display(), "error unlocking file lock");
            }
            debug!(path = %self.path.display(), "released file lock");
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn open(dir: &Path) -> Result<(PathBuf, File), LockError> {
    fs::create_dir_all(dir).map_err(|source| LockError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|source| LockError::Open {
            path: path.clone(),
            source,
        })?;
    Ok((path, file))
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
