//! The sharded write-path engine.
//!
//! ```text
//!  clients ──► ingest channel ──► write loop ──► head memtable
//!                                     │ switch       │ frozen
//!                                     ▼              ▼
//!                               flush channel ──► flush worker
//!                                                    │
//!                                      shard map ────┤
//!                                                    ▼
//!                                          <fid>.sst + <fid>.idx
//!                                                    │
//!                                     manifest ◄─────┴──► L0 set
//! ```
//!
//! [`ShardDb::open`] spawns the write loop and the flush worker; both run
//! until [`ShardDb::close`] fires the closer. Writes and shard splits
//! travel the same ingest channel so they serialize against each other.

use std::fs;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::Options;
use crate::error::{Error, Result};
use crate::flock::DirLock;
use crate::flush::FlushWorker;
use crate::manifest::{ChangeOp, Manifest};
use crate::memtable::CFTable;
use crate::oracle::Oracle;
use crate::shard::{Shard, ShardMap};
use crate::state::DbState;
use crate::write::{EngineTask, SplitRequest, SplitTask, WriteBatch, WriteLoop, WriteTask};

const MANIFEST_FILE: &str = "MANIFEST";

/// A sharded LSM write-path engine over one data directory.
pub struct ShardDb {
    opts: Arc<Options>,
    state: Arc<DbState>,
    manifest: Arc<Manifest>,
    ingest_tx: Option<mpsc::Sender<EngineTask>>,
    shutdown_tx: broadcast::Sender<()>,
    write_handle: Option<JoinHandle<()>>,
    flush_handle: Option<JoinHandle<()>>,
    _lock: DirLock,
}

impl ShardDb {
    /// Opens the engine, creating the directory as needed. Must be called
    /// from within a tokio runtime; the write loop and flush worker are
    /// spawned here.
    pub fn open(opts: Options) -> Result<Self> {
        fs::create_dir_all(&opts.dir)?;
        let lock = DirLock::acquire(&opts.dir)?;
        let manifest = Arc::new(Manifest::open(opts.dir.join(MANIFEST_FILE))?);

        // Resume file-id allocation past anything already recorded.
        let last_fid = manifest
            .replay()?
            .iter()
            .filter(|c| c.op == ChangeOp::Create && c.level == 0)
            .map(|c| c.id as u32)
            .max()
            .unwrap_or(0);

        let opts = Arc::new(opts);
        let head = CFTable::new(opts.max_memtable_size, opts.num_cfs);
        let shards = ShardMap::new(Shard::full_range(1));
        let state = Arc::new(DbState::new(head, shards, last_fid, 2));
        let oracle = Arc::new(Oracle::new(0));

        let (ingest_tx, ingest_rx) = mpsc::channel(opts.ingest_queue_depth);
        // The flush channel bound doubles as the frozen-memtable stall:
        // a switch past `num_memtables` queued flushes blocks the write
        // loop until the worker catches up.
        let (flush_tx, flush_rx) = mpsc::channel(opts.num_memtables);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let write_loop = WriteLoop::new(
            Arc::clone(&state),
            Arc::clone(&opts),
            Arc::clone(&oracle),
            flush_tx,
        );
        let write_handle = tokio::spawn(write_loop.run(ingest_rx, shutdown_rx));

        let flush_worker = FlushWorker::new(
            Arc::clone(&state),
            Arc::clone(&opts),
            Arc::clone(&oracle),
            Arc::clone(&manifest),
        );
        let flush_handle = tokio::spawn(flush_worker.run(flush_rx));

        tracing::info!(dir = %opts.dir.display(), "opened shard db");
        Ok(Self {
            opts,
            state,
            manifest,
            ingest_tx: Some(ingest_tx),
            shutdown_tx,
            write_handle: Some(write_handle),
            flush_handle: Some(flush_handle),
            _lock: lock,
        })
    }

    /// Submits a batch and waits for the write loop to apply it. Returns
    /// once every entry is in the head memtable; entries acknowledged
    /// together are visible atomically to snapshot readers.
    pub async fn write(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let (notify, acked) = oneshot::channel();
        self.submit(EngineTask::Write(WriteTask { batch, notify }))
            .await?;
        acked.await.map_err(|_| Error::Abort)?
    }

    /// Submits shard splits and waits until the new shard map is
    /// published. Splits serialize against writes on the ingest channel;
    /// flushes that snapshot the map afterwards adopt the new boundaries.
    pub async fn split(&self, requests: Vec<SplitRequest>) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        let (notify, acked) = oneshot::channel();
        self.submit(EngineTask::Split(SplitTask { requests, notify }))
            .await?;
        acked.await.map_err(|_| Error::Abort)?
    }

    async fn submit(&self, task: EngineTask) -> Result<()> {
        let ingest_tx = self.ingest_tx.as_ref().ok_or(Error::Shutdown)?;
        ingest_tx.send(task).await.map_err(|_| Error::Shutdown)
    }

    /// Point lookup across the published snapshots: memtables newest
    /// first, then L0 tables newest first.
    pub fn get(&self, cf: usize, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if cf >= self.opts.num_cfs {
            return crate::errinput!("column family {cf} out of range");
        }
        let memtables = self.state.memtables();
        for table in &memtables.tables {
            if let Some(value) = table.get(cf, key) {
                return Ok(Some(value));
            }
        }
        let l0_tables = self.state.l0_tables();
        for table in &l0_tables.tables {
            if let Some(value) = table.get(cf, key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// The current shard map snapshot.
    pub fn shards(&self) -> Arc<ShardMap> {
        self.state.shards()
    }

    /// Replayed manifest changes, for inspection and recovery tooling.
    pub fn manifest_changes(&self) -> Result<Vec<crate::manifest::ManifestChange>> {
        self.manifest.replay()
    }

    /// Graceful shutdown: the write loop finishes its pending queue, the
    /// flush worker drains every queued memtable, then both exit.
    /// Submissions still in flight when the closer fires are aborted.
    pub async fn close(&mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.ingest_tx.take();

        if let Some(handle) = self.write_handle.take() {
            handle.await?;
        }
        // The write loop owned the flush sender; once it returns the
        // flush channel closes and the worker drains out.
        if let Some(handle) = self.flush_handle.take() {
            handle.await?;
        }
        tracing::info!("shard db closed");
        Ok(())
    }
}
