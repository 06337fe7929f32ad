//! Flush worker: frozen memtables become shard-partitioned L0 files.
//!
//! The worker is the single consumer of the flush channel and the only
//! code that prepends L0 tables or removes frozen memtables. Publication
//! order is load-bearing: the manifest record is made durable first, the
//! L0 table is linked in second, and the memtable is removed last, so a
//! reader scanning memtables and L0s never misses acknowledged data.
//! Transient double-coverage is fine because reader merges favor the
//! memtable side.
//!
//! Any I/O failure here is fatal: without the flush the frozen memtable
//! can never be reclaimed and the engine cannot make progress. Recovery
//! from a crashed flush is the manifest's job at the next open.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Options;
use crate::direct::DirectWriter;
use crate::error::Result;
use crate::l0::index::L0ShardIndex;
use crate::l0::{self, L0Table, ShardDataBuilder};
use crate::manifest::{Manifest, ManifestChange};
use crate::memtable::CFTable;
use crate::oracle::Oracle;
use crate::state::DbState;

pub(crate) struct FlushWorker {
    state: Arc<DbState>,
    opts: Arc<Options>,
    oracle: Arc<Oracle>,
    manifest: Arc<Manifest>,
}

impl FlushWorker {
    pub(crate) fn new(
        state: Arc<DbState>,
        opts: Arc<Options>,
        oracle: Arc<Oracle>,
        manifest: Arc<Manifest>,
    ) -> Self {
        Self {
            state,
            opts,
            oracle,
            manifest,
        }
    }

    /// Consumes frozen memtables in submission order until the channel
    /// closes, then drains and returns.
    pub(crate) async fn run(self, mut flush_rx: mpsc::Receiver<Arc<CFTable>>) {
        while let Some(memtable) = flush_rx.recv().await {
            if let Err(err) = self.flush_and_publish(&memtable) {
                tracing::error!(error = %err, "flush failed, frozen memtable cannot be reclaimed");
                panic!("flush failed: {err}");
            }
        }
        tracing::info!("flush worker stopped");
    }

    fn flush_and_publish(&self, memtable: &Arc<CFTable>) -> Result<()> {
        let fid = self.state.next_fid();
        let path = l0::table_filename(&self.opts.dir, fid);

        let (data_file, index_file) = self.create_l0_files(&path)?;
        self.write_l0(memtable, data_file, index_file)?;

        let table = Arc::new(L0Table::open(&path, fid)?);
        tracing::info!(
            fid,
            shards = table.num_shards(),
            bytes = table.size(),
            "flushed memtable to L0"
        );
        self.publish(table, memtable)
    }

    fn create_l0_files(&self, path: &Path) -> Result<(File, File)> {
        let mut open_opts = OpenOptions::new();
        open_opts.read(true).write(true).create(true).truncate(true);
        if self.opts.direct_io {
            #[cfg(target_os = "linux")]
            {
                use std::os::unix::fs::OpenOptionsExt;
                open_opts.custom_flags(libc::O_DIRECT);
            }
        }
        let data_file = open_opts.open(path)?;
        let index_file = open_opts.open(l0::index_filename(path))?;
        Ok((data_file, index_file))
    }

    /// Groups the memtable's entries by owning shard and writes the data
    /// file followed by its sidecar index.
    fn write_l0(&self, memtable: &CFTable, data_file: File, index_file: File) -> Result<()> {
        let mut writer =
            DirectWriter::new(data_file, self.opts.write_buffer_size, self.opts.sync_writes);

        // One shard map snapshot governs the whole flush.
        let shards = self.state.shards();
        let mut builders: HashMap<u64, ShardDataBuilder> = HashMap::new();

        for cf in 0..self.opts.num_cfs {
            // Keys ascend within a CF, so the previous builder usually
            // still owns the current key; the map lookup is the slow path.
            let mut last_shard_id: Option<u64> = None;
            for (key, value) in memtable.iter(cf) {
                let shard_id = match last_shard_id {
                    Some(id) if builders[&id].shard().contains(&key) => id,
                    _ => {
                        let shard = shards.get(&key);
                        let id = shard.id;
                        builders
                            .entry(id)
                            .or_insert_with(|| ShardDataBuilder::new(shard, self.opts.num_cfs));
                        last_shard_id = Some(id);
                        id
                    }
                };
                builders
                    .get_mut(&shard_id)
                    .expect("builder exists for shard")
                    .add(cf, &key, &value);
            }
        }

        let mut sorted: Vec<ShardDataBuilder> = builders.into_values().collect();
        sorted.sort_by(|a, b| a.shard().start.cmp(&b.shard().start));

        let mut index = L0ShardIndex {
            start_keys: Vec::with_capacity(sorted.len()),
            end_key: sorted
                .last()
                .expect("flushed memtable is never empty")
                .shard()
                .end
                .clone(),
            end_offsets: Vec::with_capacity(sorted.len()),
        };

        let mut end_offset = 0u32;
        for builder in sorted {
            index.start_keys.push(builder.shard().start.clone());
            let blob = builder.finish();
            end_offset += blob.len() as u32;
            index.end_offsets.push(end_offset);
            writer.write(&blob)?;
        }
        writer.finish()?;

        writer.reset(index_file);
        writer.write(&index.encode())?;
        writer.finish()?;
        Ok(())
    }

    /// Makes the flush durable and visible: manifest record, then L0
    /// prepend, then memtable removal.
    fn publish(&self, table: Arc<L0Table>, memtable: &Arc<CFTable>) -> Result<()> {
        let change = ManifestChange::create_l0(table.fid() as u64, self.oracle.commit_ts());
        self.manifest.append(&change)?;
        self.manifest.sync()?;

        self.state.prepend_l0(table);
        self.state.remove_memtable(memtable);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memtable::Entry;
    use crate::shard::{Shard, ShardMap};
    use crate::testutil::TestDir;

    fn test_worker(dir: &TestDir, num_cfs: usize, shards: ShardMap) -> FlushWorker {
        let opts = Arc::new(dir.options().num_cfs(num_cfs));
        let state = Arc::new(DbState::new(
            CFTable::new(1024, num_cfs),
            shards,
            0,
            100,
        ));
        let manifest = Arc::new(Manifest::open(dir.file("MANIFEST")).unwrap());
        FlushWorker::new(state, opts, Arc::new(Oracle::new(1)), manifest)
    }

    fn entries(pairs: &[(&[u8], &[u8])]) -> Vec<Entry> {
        pairs
            .iter()
            .map(|(k, v)| Entry::new(k.to_vec(), v.to_vec()))
            .collect()
    }

    #[test]
    fn test_flush_single_shard() {
        let dir = TestDir::new();
        let worker = test_worker(&dir, 1, ShardMap::new(Shard::full_range(1)));

        let memtable = Arc::new(CFTable::new(1024, 1));
        memtable
            .put_entries(0, entries(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]))
            .unwrap();

        worker.flush_and_publish(&memtable).unwrap();

        let l0 = worker.state.l0_tables();
        assert_eq!(l0.tables.len(), 1);
        let table = &l0.tables[0];
        assert_eq!(table.fid(), 1);
        assert_eq!(table.num_shards(), 1);
        assert!(table.index().start_keys[0].is_empty());
        assert!(table.index().end_key.is_empty());
        assert_eq!(table.index().end_offsets[0] as usize, table.size());

        // The data file on disk matches the index's last offset.
        let file_len = std::fs::metadata(l0::table_filename(dir.path(), 1))
            .unwrap()
            .len();
        assert_eq!(file_len, table.size() as u64);

        assert_eq!(table.get(0, b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_flush_partitions_by_shard() {
        let dir = TestDir::new();
        let map = ShardMap::new(Shard::full_range(1));
        let base = map.get(b"");
        let mut next = 2;
        let split = base
            .split(&[b"m".to_vec()], || {
                let id = next;
                next += 1;
                id
            })
            .unwrap();
        let map = map.replace(&[base], split).unwrap();
        let worker = test_worker(&dir, 1, map);

        let memtable = Arc::new(CFTable::new(1024, 1));
        memtable
            .put_entries(0, entries(&[(b"a", b"1"), (b"n", b"2")]))
            .unwrap();

        worker.flush_and_publish(&memtable).unwrap();

        let l0 = worker.state.l0_tables();
        let table = &l0.tables[0];
        assert_eq!(table.num_shards(), 2);
        assert_eq!(table.index().start_keys[0], b"");
        assert_eq!(table.index().start_keys[1], b"m");
        assert!(table.index().end_key.is_empty());

        // Each key landed in its owning shard's blob.
        assert_eq!(
            table.iter_shard_cf(0, 0).unwrap(),
            vec![(b"a".to_vec(), b"1".to_vec())]
        );
        assert_eq!(
            table.iter_shard_cf(1, 0).unwrap(),
            vec![(b"n".to_vec(), b"2".to_vec())]
        );
    }

    #[test]
    fn test_flush_removes_memtable_and_records_manifest() {
        let dir = TestDir::new();
        let worker = test_worker(&dir, 1, ShardMap::new(Shard::full_range(1)));

        // Freeze a non-head memtable the way a switch would.
        let frozen = worker
            .state
            .prepend_memtable(Arc::new(CFTable::new(1024, 1)));
        frozen
            .put_entries(0, entries(&[(b"k", b"v")]))
            .unwrap();
        frozen.freeze();

        assert_eq!(worker.state.memtables().tables.len(), 2);
        worker.flush_and_publish(&frozen).unwrap();
        assert_eq!(worker.state.memtables().tables.len(), 1);

        let changes = worker.manifest.replay().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].id, 1);
        assert_eq!(changes[0].level, 0);
        assert_eq!(changes[0].head_version, 1);
    }

    #[test]
    fn test_flush_multiple_cfs_share_shard_blob() {
        let dir = TestDir::new();
        let worker = test_worker(&dir, 2, ShardMap::new(Shard::full_range(1)));

        let memtable = Arc::new(CFTable::new(1024, 2));
        memtable.put_entries(0, entries(&[(b"x", b"cf0")])).unwrap();
        memtable.put_entries(1, entries(&[(b"x", b"cf1")])).unwrap();

        worker.flush_and_publish(&memtable).unwrap();

        let l0 = worker.state.l0_tables();
        let table = &l0.tables[0];
        assert_eq!(table.num_shards(), 1);
        assert_eq!(table.get(0, b"x").unwrap(), Some(b"cf0".to_vec()));
        assert_eq!(table.get(1, b"x").unwrap(), Some(b"cf1".to_vec()));
    }
}
