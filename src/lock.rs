//! Store-directory lock (C7, §4.7): one exclusive advisory lock per store
//! directory, acquired around `initial_sync` and around individual writes.
//! Grounded in the `fs2` dependency already declared in the teacher's own
//! workspace (`coco-rs/app/state`, `coco-rs/tasks`) for the same advisory
//! file-locking need.

use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use fs2::FileExt;

use crate::error::OsgrepError;
use crate::error::Result;

const LOCK_FILE_NAME: &str = "osgrep.lock";
const DEFAULT_RETRIES: u32 = 20;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Holds an exclusive advisory lock on `<store_dir>/osgrep.lock` for its
/// lifetime; dropping it releases the lock (§4.7).
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Blocks with bounded retries and fixed backoff; returns
    /// `OsgrepError::LockContended` once `retries` is exhausted (§4.7).
    pub fn acquire(store_dir: &Path) -> Result<Self> {
        Self::acquire_with(store_dir, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY)
    }

    pub fn acquire_with(store_dir: &Path, retries: u32, delay: Duration) -> Result<Self> {
        std::fs::create_dir_all(store_dir)?;
        let path = store_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let mut attempts = 0;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file, path }),
                Err(e) if attempts < retries => {
                    attempts += 1;
                    let _ = e;
                    std::thread::sleep(delay);
                }
                Err(e) => {
                    return Err(OsgrepError::LockContended {
                        attempts,
                        cause: e.to_string(),
                    });
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release store lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let lock = StoreLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());
        drop(lock);
        let lock2 = StoreLock::acquire(dir.path()).unwrap();
        drop(lock2);
    }

    #[test]
    fn second_acquire_fails_fast_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let _held = StoreLock::acquire(dir.path()).unwrap();
        let second = StoreLock::acquire_with(dir.path(), 1, Duration::from_millis(1));
        assert!(matches!(second, Err(OsgrepError::LockContended { attempts: 1, .. })));
    }
}
