//! Host-level run lock.
//!
//! Only one run may be in flight per project directory. The lock is an
//! exclusive advisory `fs2` lock on `.assemble/assemble.lock`, held for the
//! lifetime of [`RunLock`] and released when it is dropped.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::AssembleError;

#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock without waiting. A held lock is `AssembleError::Busy`.
    pub fn acquire(path: &Path) -> Result<Self, AssembleError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AssembleError::Config(format!(
                    "cannot create lock directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                AssembleError::Config(format!("cannot open lock file {}: {}", path.display(), e))
            })?;

        if file.try_lock_exclusive().is_err() {
            let holder = std::fs::read_to_string(path).unwrap_or_default();
            let holder = holder.trim();
            return Err(AssembleError::Busy(if holder.is_empty() {
                format!("lock held on {}", path.display())
            } else {
                format!("pid {}", holder)
            }));
        }

        // Record the holder for the next process that finds the lock taken.
        file.set_len(0).ok();
        write!(file, "{}", std::process::id()).ok();
        file.flush().ok();

        tracing::debug!(path = %path.display(), "run lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
        tracing::debug!(path = %self.path.display(), "run lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_acquire_is_busy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".assemble").join("assemble.lock");
        let first = RunLock::acquire(&path).unwrap();
        assert!(path.exists());

        let err = RunLock::acquire(&path).unwrap_err();
        assert!(matches!(err, AssembleError::Busy(_)));
        assert!(err.to_string().contains(&std::process::id().to_string()));
        assert_eq!(err.exit_code(), 1);

        drop(first);
        assert!(RunLock::acquire(&path).is_ok());
    }
}
