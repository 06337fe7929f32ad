//! Per-column-family memtable backed by concurrent skip lists.
//!
//! A [`CFTable`] holds one ordered container per column family. The head
//! table of the stack is the only writable one; a switch freezes it and
//! every later access is read-only until the flush worker drains it. Skip
//! lists allow concurrent readers without locks while the single write
//! loop performs all inserts.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;

use crate::error::{Error, Result};

/// Rough per-entry bookkeeping charge on top of key and value bytes.
const ENTRY_OVERHEAD: usize = 16;

/// A single key/value pair bound for a memtable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    /// Size estimate used for switch decisions and capacity sizing.
    pub fn estimated_size(&self) -> usize {
        self.key.len() + self.value.len() + ENTRY_OVERHEAD
    }
}

/// Multi-column-family memtable. Writable until frozen; frozen tables
/// serve reads while queued for flush.
#[derive(Debug)]
pub struct CFTable {
    cfs: Vec<SkipMap<Vec<u8>, Vec<u8>>>,
    size: AtomicUsize,
    capacity: usize,
    frozen: AtomicBool,
}

impl CFTable {
    /// Creates an empty table with the given capacity target and column
    /// family count.
    pub fn new(capacity: usize, num_cfs: usize) -> Self {
        Self {
            cfs: (0..num_cfs).map(|_| SkipMap::new()).collect(),
            size: AtomicUsize::new(0),
            capacity,
            frozen: AtomicBool::new(false),
        }
    }

    /// Bulk-inserts entries into one column family. Entries must be sorted
    /// by key; the write loop sorts each drained group before insertion.
    pub fn put_entries(&self, cf: usize, entries: Vec<Entry>) -> Result<()> {
        if self.frozen.load(Ordering::SeqCst) {
            return Err(Error::ReadOnly);
        }
        debug_assert!(entries.windows(2).all(|w| w[0].key <= w[1].key));
        let mut added = 0;
        for entry in entries {
            added += entry.estimated_size();
            self.cfs[cf].insert(entry.key, entry.value);
        }
        self.size.fetch_add(added, Ordering::SeqCst);
        Ok(())
    }

    pub fn get(&self, cf: usize, key: &[u8]) -> Option<Vec<u8>> {
        self.cfs[cf].get(key).map(|entry| entry.value().clone())
    }

    /// Keys in ascending order within one column family.
    pub fn iter(&self, cf: usize) -> impl Iterator<Item = (Vec<u8>, Vec<u8>)> + '_ {
        self.cfs[cf]
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }

    /// Estimated bytes held by this table.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.cfs.iter().all(|cf| cf.is_empty())
    }

    /// The capacity this table was sized for at switch time.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_cfs(&self) -> usize {
        self.cfs.len()
    }

    /// Marks the table read-only. Further `put_entries` calls fail.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }
}
