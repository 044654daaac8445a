//! ProcessLock — cooperative cross-process exclusion for the ledger.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{info, warn};

use crate::error::{StateError, StateResult};

/// Exclusive advisory file lock held for the whole process lifetime.
///
/// Prevents two scheduler instances from mutating the same ledger; the
/// loser of the race gets `StateError::Locked` and should exit
/// immediately. The OS releases the lock if the process dies, so a
/// crashed scheduler never wedges its successor.
pub struct ProcessLock {
    file: File,
    path: PathBuf,
}

impl ProcessLock {
    /// Try to take the lock, failing fast if another instance holds it.
    pub fn acquire(path: &Path) -> StateResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        file.try_lock_exclusive()
            .map_err(|_| StateError::Locked(path.to_path_buf()))?;
        info!(?path, "ledger lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!(path = ?self.path, error = %e, "failed to release ledger lock");
        }
        // The file is left in place. Unlinking it would let a third
        // instance lock a fresh inode at the same path while a second
        // still holds the old one; the advisory lock is the contract,
        // an empty leftover file is harmless.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attempts.lock");

        let lock = ProcessLock::acquire(&path).unwrap();
        drop(lock);

        // The file stays behind; only the lock is released, so the
        // same path can be taken again.
        assert!(path.exists());
        let _again = ProcessLock::acquire(&path).unwrap();
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attempts.lock");

        let _held = ProcessLock::acquire(&path).unwrap();
        match ProcessLock::acquire(&path) {
            Err(StateError::Locked(p)) => assert_eq!(p, path),
            Err(e) => panic!("expected Locked error, got {e}"),
            Ok(_) => panic!("second acquire unexpectedly succeeded"),
        }
    }
}
