use std::sync::atomic::{AtomicU64, Ordering};

/// Commit-version oracle. The write loop advances the version once per
/// executed group; each flush stamps its manifest record with the current
/// value so recovery knows the highest version the L0 file can contain.
#[derive(Debug)]
pub struct Oracle {
    commit_ts: AtomicU64,
}

impl Oracle {
    pub fn new(start: u64) -> Self {
        Self {
            commit_ts: AtomicU64::new(start),
        }
    }

    /// The current commit version.
    pub fn commit_ts(&self) -> u64 {
        self.commit_ts.load(Ordering::SeqCst)
    }

    /// Advances the commit version, returning the new value.
    pub fn bump(&self) -> u64 {
        self.commit_ts.fetch_add(1, Ordering::SeqCst) + 1
    }
}
