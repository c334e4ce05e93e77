//! Single-writer locking for collection directories.
//!
//! Uses flock() for advisory locking. A `VectorStore` acquires the lock when the
//! collection is opened and holds it until dropped, so two processes can never
//! write the same collection file concurrently.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Lock file name placed in the collection directory
const LOCK_FILE_NAME: &str = "collection.lock";

/// A held file lock that releases on drop
#[derive(Debug)]
pub struct FileLock {
    #[allow(dead_code)]
    file: File,
}

impl FileLock {
    /// Attempt to acquire an exclusive lock on `dir`.
    /// Returns `Ok(FileLock)` if acquired, or `WouldBlock` if another writer holds it.
    pub fn try_acquire(dir: &Path) -> io::Result<Self> {
        let lock_path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        Self::try_lock_exclusive(&file)?;

        Ok(FileLock { file })
    }

    #[cfg(unix)]
    fn try_lock_exclusive(file: &File) -> io::Result<()> {
        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid open descriptor owned by `file` for the duration of the call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock
                || err.raw_os_error() == Some(libc::EWOULDBLOCK)
                || err.raw_os_error() == Some(libc::EAGAIN)
            {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "collection is locked by another writer",
                ));
            }
            return Err(err);
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock_exclusive(_file: &File) -> io::Result<()> {
        // No advisory locking on non-unix targets
        Ok(())
    }
}

#[cfg(unix)]
impl Drop for FileLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // SAFETY: the descriptor is still owned by `self.file`; errors on unlock are ignored.
        unsafe { libc::flock(fd, libc::LOCK_UN) };
    }
}
