//! Advisory writer lock for conversation logs.
//!
//! One writer per log file per host; readers never lock and tolerate stale
//! reads. The lock rides on a sidecar `.lock` file so the log itself can be
//! renamed atomically underneath it.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

use super::StoreError;

/// Held for the lifetime of an exclusive-mode log. Released on drop.
#[derive(Debug)]
pub struct LogLock {
    file: File,
}

impl LogLock {
    /// Tries to take the exclusive advisory lock for the given log file.
    pub fn acquire(log_path: &Path) -> Result<Self, StoreError> {
        let lock_path = log_path.with_extension("jsonl.lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(StoreError::Io)?;
        file.try_lock_exclusive().map_err(|_| StoreError::Locked {
            path: log_path.to_path_buf(),
        })?;
        Ok(Self { file })
    }
}

impl Drop for LogLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_writer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("conversation.jsonl");
        std::fs::write(&log_path, "").unwrap();

        let first = LogLock::acquire(&log_path).unwrap();
        let second = LogLock::acquire(&log_path);
        assert!(matches!(second, Err(StoreError::Locked { .. })));

        drop(first);
        assert!(LogLock::acquire(&log_path).is_ok());
    }
}
