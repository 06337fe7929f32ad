//! Test support: scratch data directories and pre-tuned engine options.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::Options;

static NEXT_DIR: AtomicU64 = AtomicU64::new(0);

/// A scratch directory under the system temp dir, removed on drop. A
/// process-wide counter keeps instances unique so tests run in parallel.
pub struct TestDir {
    path: PathBuf,
}

impl TestDir {
    pub fn new() -> Self {
        let seq = NEXT_DIR.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "cinderdb_test_{}_{seq}",
            std::process::id()
        ));
        if path.exists() {
            fs::remove_dir_all(&path).expect("failed to clear stale test dir");
        }
        fs::create_dir_all(&path).expect("failed to create test dir");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A path inside the directory, for tests that manage their own files.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Engine options rooted here, tuned for tests: one column family, a
    /// tiny memtable so switches are easy to trigger, and direct I/O off
    /// because tmpfs rejects O_DIRECT.
    pub fn options(&self) -> Options {
        Options::new(&self.path)
            .num_cfs(1)
            .max_memtable_size(1024)
            .direct_io(false)
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}
