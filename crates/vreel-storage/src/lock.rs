//! Exclusive run lock on a checkpoint directory.

use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Name of the lock file created in the checkpoint directory.
pub const LOCK_FILE_NAME: &str = ".vreel.lock";

/// Held for the duration of a pipeline run; removes the lock file on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Acquire the lock in `dir`.
    ///
    /// Fails with [`StorageError::Locked`] if another run holds it.
    pub fn acquire(dir: &Path, run_id: &str) -> StorageResult<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);

        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();
                return Err(StorageError::Locked { path, holder });
            }
            Err(e) => return Err(e.into()),
        };

        writeln!(
            file,
            "run={} pid={} started={}",
            run_id,
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        )?;
        file.sync_all()?;

        debug!(path = %path.display(), run_id, "Acquired run lock");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to release run lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_lock_is_rejected() {
        let dir = TempDir::new().unwrap();
        let lock = RunLock::acquire(dir.path(), "run-a").unwrap();

        let err = RunLock::acquire(dir.path(), "run-b").unwrap_err();
        match err {
            StorageError::Locked { holder, .. } => assert!(holder.contains("run=run-a")),
            other => panic!("unexpected error: {other}"),
        }

        drop(lock);
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
        assert!(RunLock::acquire(dir.path(), "run-b").is_ok());
    }
}
