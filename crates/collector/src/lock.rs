use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another run holds {path} ({holder})")]
    Held { path: PathBuf, holder: String },
    #[error("create lock {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Cross-process run lock: a file created exclusively, holding the owner's
/// pid and start time. Removed on drop. A lock left by a crashed process has
/// to be removed by hand.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(path)
                    .unwrap_or_default()
                    .trim()
                    .replace('\n', ", ");
                return Err(LockError::Held {
                    path: path.to_path_buf(),
                    holder,
                });
            }
            Err(source) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let started = chrono::Utc::now().to_rfc3339();
        if let Err(e) = writeln!(file, "pid={}\nstarted={started}", std::process::id()) {
            warn!(path = %path.display(), error = %e, "could not write lock owner");
        }

        info!(path = %path.display(), "run lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not remove run lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vod.lock");

        let lock = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        match err {
            LockError::Held { holder, .. } => assert!(holder.starts_with("pid=")),
            other => panic!("unexpected {other:?}"),
        }

        drop(lock);
        assert!(!path.exists());
        RunLock::acquire(&path).unwrap();
    }
}
