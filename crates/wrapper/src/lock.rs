//! Local already-running detection via the job's own PID file
//! (`CRABPIDFILE`), using the same `fs2` advisory-lock technique used
//! for the daemon's own PID file (`crab-daemon::pid`): a live previous
//! invocation holds the lock, so a failed non-blocking acquire means
//! "already running" without any `/proc` polling.

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

/// Attempt to take an exclusive, non-blocking lock on `path`. Returns
/// `Ok(None)` (not an error) when the lock is already held — that is
/// the ordinary "previous invocation still running" case.
pub fn try_acquire(path: &Path) -> std::io::Result<Option<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).write(true).read(true).open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(file)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.pid");

        let first = try_acquire(&path).unwrap();
        assert!(first.is_some());

        let second = try_acquire(&path).unwrap();
        assert!(second.is_none(), "lock should still be held by `first`");

        drop(first);
        let third = try_acquire(&path).unwrap();
        assert!(third.is_some(), "lock releases once the holder drops");
    }
}
