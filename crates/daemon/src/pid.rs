//! PID file management: startup refuses if the PID file exists and its
//! referenced process is alive; otherwise it writes the file and
//! removes it on all shutdown paths.
//!
//! An `fs2` exclusive advisory lock on the PID file itself means a
//! live owning process keeps the lock held, so "is the process alive"
//! never needs `/proc` polling — a stale PID file whose process died
//! is simply unlocked.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use fs2::FileExt;

/// Write the current process PID to `path` and acquire an exclusive lock.
///
/// Returns the open [`File`] handle — the caller must keep it alive for
/// the lifetime of the daemon so the advisory lock is held.
pub fn write_pid_file(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .read(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("opening PID file {}: {e}", path.display()))?;

    file.try_lock_exclusive().map_err(|_| {
        anyhow::anyhow!(
            "another crabd instance is running (PID file {} is locked)",
            path.display()
        )
    })?;

    file.set_len(0)?;
    let pid = std::process::id();
    {
        let mut f = &file;
        writeln!(f, "{pid}")?;
        f.flush()?;
    }

    tracing::info!(path = %path.display(), pid, "PID file written");
    Ok(file)
}

/// Remove the PID file at `path`, on every shutdown path (normal,
/// signal, fatal error).
pub fn remove_pid_file(path: &Path, _handle: File) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_remove_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("crabd.pid");

        let handle = write_pid_file(&pid_path).unwrap();
        let content = fs::read_to_string(&pid_path).unwrap();
        let stored_pid: u32 = content.trim().parse().unwrap();
        assert_eq!(stored_pid, std::process::id());

        let second = write_pid_file(&pid_path);
        assert!(second.is_err(), "expected lock conflict");

        remove_pid_file(&pid_path, handle);
        assert!(!pid_path.exists());
    }

    #[test]
    fn creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("nested").join("dirs").join("crabd.pid");

        let handle = write_pid_file(&pid_path).unwrap();
        assert!(pid_path.exists());

        remove_pid_file(&pid_path, handle);
    }
}
