//! Exclusive lock on the engine's data directory.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};

const LOCK_FILE: &str = "cinderdb.lock";

/// Holds `flock(2)` on `<dir>/cinderdb.lock` for the lifetime of the
/// engine, so two processes cannot mutate the same data directory. The
/// lock is released when the handle drops; the lock file itself stays
/// behind to avoid unlink races.
pub struct DirLock {
    _file: File,
}

impl DirLock {
    /// Locks `dir`, failing immediately if another engine holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let mut file = File::options()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        if !try_flock(&file) {
            return Err(Error::IO(format!(
                "data directory {} is locked by another process",
                dir.display()
            )));
        }

        // Stamp the owner pid so stale locks are debuggable.
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file })
    }
}

#[cfg(unix)]
fn try_flock(file: &File) -> bool {
    use std::os::unix::io::AsRawFd;
    unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) == 0 }
}

#[cfg(not(unix))]
fn try_flock(_file: &File) -> bool {
    // No advisory locking on this platform.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestDir;

    #[test]
    fn test_acquire_stamps_pid() {
        let dir = TestDir::new();
        let _held = DirLock::acquire(dir.path()).expect("failed to lock dir");

        let content = std::fs::read_to_string(dir.file(LOCK_FILE)).unwrap();
        assert!(content.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_second_acquire_fails() {
        let dir = TestDir::new();
        let _held = DirLock::acquire(dir.path()).expect("failed to lock dir");

        assert!(matches!(
            DirLock::acquire(dir.path()),
            Err(Error::IO(_))
        ));
    }

    #[test]
    fn test_reacquire_after_drop() {
        let dir = TestDir::new();
        drop(DirLock::acquire(dir.path()).expect("failed to lock dir"));
        DirLock::acquire(dir.path()).expect("lock should be free after drop");
    }
}
