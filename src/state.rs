//! Published engine state.
//!
//! Three structures are shared between the write loop, the flush worker
//! and readers: the memtable stack, the L0 set and the shard map. Each is
//! an immutable instance behind an `Arc`; readers clone the `Arc` once per
//! logical operation and traverse without further coordination. Mutators
//! build a replacement instance and swap it in while holding the write
//! lock only for the pointer store.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::l0::L0Table;
use crate::memtable::CFTable;
use crate::shard::ShardMap;

/// Snapshot of the memtable stack, newest first. `tables[0]` is the
/// writable head; the rest are frozen and queued or being flushed.
#[derive(Debug)]
pub struct MemtableList {
    pub tables: Vec<Arc<CFTable>>,
}

/// Snapshot of the L0 set, newest first.
#[derive(Debug, Default)]
pub struct L0List {
    pub tables: Vec<Arc<L0Table>>,
}

pub struct DbState {
    memtables: RwLock<Arc<MemtableList>>,
    l0_tables: RwLock<Arc<L0List>>,
    shards: RwLock<Arc<ShardMap>>,

    last_fid: AtomicU32,
    next_shard_id: AtomicU64,
}

impl DbState {
    pub fn new(head: CFTable, shards: ShardMap, last_fid: u32, next_shard_id: u64) -> Self {
        Self {
            memtables: RwLock::new(Arc::new(MemtableList {
                tables: vec![Arc::new(head)],
            })),
            l0_tables: RwLock::new(Arc::new(L0List::default())),
            shards: RwLock::new(Arc::new(shards)),
            last_fid: AtomicU32::new(last_fid),
            next_shard_id: AtomicU64::new(next_shard_id),
        }
    }

    /// Current memtable stack snapshot.
    pub fn memtables(&self) -> Arc<MemtableList> {
        Arc::clone(&self.memtables.read().unwrap())
    }

    /// The writable head memtable.
    pub fn head(&self) -> Arc<CFTable> {
        Arc::clone(&self.memtables.read().unwrap().tables[0])
    }

    /// Switch: installs `new_head` at the front of the stack and returns
    /// the displaced head.
    pub fn prepend_memtable(&self, new_head: Arc<CFTable>) -> Arc<CFTable> {
        let mut guard = self.memtables.write().unwrap();
        let old_head = Arc::clone(&guard.tables[0]);
        let mut tables = Vec::with_capacity(guard.tables.len() + 1);
        tables.push(new_head);
        tables.extend(guard.tables.iter().cloned());
        *guard = Arc::new(MemtableList { tables });
        old_head
    }

    /// Drain: removes the given table from the stack. Earlier snapshots
    /// keep it alive until their readers finish.
    pub fn remove_memtable(&self, table: &Arc<CFTable>) {
        let mut guard = self.memtables.write().unwrap();
        let tables: Vec<_> = guard
            .tables
            .iter()
            .filter(|t| !Arc::ptr_eq(t, table))
            .cloned()
            .collect();
        debug_assert_eq!(tables.len() + 1, guard.tables.len());
        debug_assert!(!tables.is_empty());
        *guard = Arc::new(MemtableList { tables });
    }

    /// Current L0 set snapshot.
    pub fn l0_tables(&self) -> Arc<L0List> {
        Arc::clone(&self.l0_tables.read().unwrap())
    }

    /// Installs a freshly flushed table at the front of the L0 set.
    pub fn prepend_l0(&self, table: Arc<L0Table>) {
        let mut guard = self.l0_tables.write().unwrap();
        let mut tables = Vec::with_capacity(guard.tables.len() + 1);
        tables.push(table);
        tables.extend(guard.tables.iter().cloned());
        *guard = Arc::new(L0List { tables });
    }

    /// Current shard map snapshot.
    pub fn shards(&self) -> Arc<ShardMap> {
        Arc::clone(&self.shards.read().unwrap())
    }

    /// Publishes a new shard map built by a split.
    pub fn publish_shards(&self, shards: Arc<ShardMap>) {
        *self.shards.write().unwrap() = shards;
    }

    /// Allocates the next L0 file id. Ids start at 1 and are monotonic.
    pub fn next_fid(&self) -> u32 {
        self.last_fid.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn next_shard_id(&self) -> u64 {
        self.next_shard_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::Shard;

    fn test_state() -> DbState {
        DbState::new(
            CFTable::new(1024, 1),
            ShardMap::new(Shard::full_range(1)),
            0,
            2,
        )
    }

    #[test]
    fn test_switch_prepends_head() {
        let state = test_state();
        let first_head = state.head();

        let displaced = state.prepend_memtable(Arc::new(CFTable::new(2048, 1)));
        assert!(Arc::ptr_eq(&displaced, &first_head));

        let snapshot = state.memtables();
        assert_eq!(snapshot.tables.len(), 2);
        assert_eq!(snapshot.tables[0].capacity(), 2048);
        assert!(Arc::ptr_eq(&snapshot.tables[1], &first_head));
    }

    #[test]
    fn test_remove_targets_exact_table() {
        let state = test_state();
        let oldest = state.prepend_memtable(Arc::new(CFTable::new(1024, 1)));
        let middle = state.prepend_memtable(Arc::new(CFTable::new(1024, 1)));

        state.remove_memtable(&oldest);

        let snapshot = state.memtables();
        assert_eq!(snapshot.tables.len(), 2);
        assert!(snapshot.tables.iter().all(|t| !Arc::ptr_eq(t, &oldest)));
        assert!(Arc::ptr_eq(&snapshot.tables[1], &middle));
    }

    #[test]
    fn test_snapshot_is_stable_across_mutation() {
        let state = test_state();
        let snapshot = state.memtables();

        state.prepend_memtable(Arc::new(CFTable::new(1024, 1)));

        // The earlier snapshot still sees one table.
        assert_eq!(snapshot.tables.len(), 1);
        assert_eq!(state.memtables().tables.len(), 2);
    }

    #[test]
    fn test_fid_allocation_is_monotonic() {
        let state = test_state();
        assert_eq!(state.next_fid(), 1);
        assert_eq!(state.next_fid(), 2);
        assert_eq!(state.next_fid(), 3);
    }
}
