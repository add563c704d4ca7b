//! Advisory single-writer lock on the database directory.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("another process holds the database lock")]
    Held,
}

/// Exclusive `flock` on the `LOCK` file. The lock lives as long as this
/// handle; dropping it (closing the descriptor) releases it. The file itself
/// is left in place.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).write(true).open(&path)?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(LockError::Held);
            }
            return Err(LockError::Io(err));
        }

        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("LOCK");

        let held = FileLock::acquire(&path).unwrap();
        assert!(matches!(FileLock::acquire(&path), Err(LockError::Held)));

        drop(held);
        FileLock::acquire(&path).unwrap();
    }
}
