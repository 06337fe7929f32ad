//! Ingest channel types and the single-writer loop.
//!
//! All mutations funnel through one bounded channel drained by one task:
//! write batches and shard splits travel as the same tagged message, so
//! splits serialize naturally against the writes around them. Each loop
//! iteration blocks for one message, drains whatever else is buffered,
//! executes the write batches as a group and then the split, and notifies
//! every submitter through its oneshot channel.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::Options;
use crate::error::{Error, Result};
use crate::memtable::{CFTable, Entry};
use crate::oracle::Oracle;
use crate::state::DbState;

/// An ordered group of entries applied together. Entries across column
/// families in one batch land in the same memtable and become visible
/// atomically to readers that snapshot after the acknowledgement.
#[derive(Debug, Default)]
pub struct WriteBatch {
    pub(crate) entries: Vec<BatchEntry>,
}

#[derive(Debug)]
pub(crate) struct BatchEntry {
    pub cf: usize,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, cf: usize, key: &[u8], value: &[u8]) {
        self.entries.push(BatchEntry {
            cf,
            key: key.to_vec(),
            value: value.to_vec(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A request to subdivide one shard at the given keys.
#[derive(Debug, Clone)]
pub struct SplitRequest {
    pub shard_id: u64,
    pub keys: Vec<Vec<u8>>,
}

pub(crate) struct WriteTask {
    pub batch: WriteBatch,
    pub notify: oneshot::Sender<Result<()>>,
}

pub(crate) struct SplitTask {
    pub requests: Vec<SplitRequest>,
    pub notify: oneshot::Sender<Result<()>>,
}

impl WriteTask {
    fn complete(self, result: Result<()>) {
        let _ = self.notify.send(result);
    }
}

impl SplitTask {
    fn complete(self, result: Result<()>) {
        let _ = self.notify.send(result);
    }
}

/// Messages multiplexed onto the ingest channel.
pub(crate) enum EngineTask {
    Write(WriteTask),
    Split(SplitTask),
}

/// The single consumer of the ingest channel and sole mutator of the head
/// memtable.
pub(crate) struct WriteLoop {
    state: Arc<DbState>,
    opts: Arc<Options>,
    oracle: Arc<Oracle>,
    flush_tx: mpsc::Sender<Arc<CFTable>>,
}

impl WriteLoop {
    pub(crate) fn new(
        state: Arc<DbState>,
        opts: Arc<Options>,
        oracle: Arc<Oracle>,
        flush_tx: mpsc::Sender<Arc<CFTable>>,
    ) -> Self {
        Self {
            state,
            opts,
            oracle,
            flush_tx,
        }
    }

    pub(crate) async fn run(
        self,
        mut ingest: mpsc::Receiver<EngineTask>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            let (writes, split) = Self::collect_tasks(&mut ingest, &mut shutdown).await;
            if writes.is_empty() && split.is_none() {
                break;
            }
            if !writes.is_empty() {
                self.execute_write_tasks(writes).await;
            }
            if let Some(task) = split {
                self.execute_split_task(task);
            }
        }
        tracing::info!("write loop stopped");
    }

    /// Blocks for one task, then drains everything already buffered.
    /// Pending tasks win over shutdown so the loop finishes its queue.
    async fn collect_tasks(
        ingest: &mut mpsc::Receiver<EngineTask>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> (Vec<WriteTask>, Option<SplitTask>) {
        let mut writes = Vec::new();
        let mut split = None;

        let first = tokio::select! {
            biased;
            task = ingest.recv() => match task {
                Some(task) => task,
                None => return (writes, split),
            },
            _ = shutdown.recv() => return (writes, split),
        };
        Self::enqueue(first, &mut writes, &mut split);
        while let Ok(task) = ingest.try_recv() {
            Self::enqueue(task, &mut writes, &mut split);
        }
        (writes, split)
    }

    fn enqueue(task: EngineTask, writes: &mut Vec<WriteTask>, split: &mut Option<SplitTask>) {
        match task {
            EngineTask::Write(task) => writes.push(task),
            EngineTask::Split(task) => {
                // At most one split per drained group; splits are
                // idempotent coordinator retries and the latest wins.
                if let Some(superseded) = split.replace(task) {
                    superseded.complete(Err(Error::Abort));
                }
            }
        }
    }

    async fn execute_write_tasks(&self, tasks: Vec<WriteTask>) {
        let mut accepted = Vec::with_capacity(tasks.len());
        for task in tasks {
            let bad_cf = task
                .batch
                .entries
                .iter()
                .map(|e| e.cf)
                .find(|cf| *cf >= self.opts.num_cfs);
            if let Some(cf) = bad_cf {
                task.complete(crate::errinput!("column family {cf} out of range"));
                continue;
            }
            accepted.push(task);
        }
        if accepted.is_empty() {
            return;
        }

        let (entries, estimated_size) = self.build_mem_entries(&mut accepted);

        let mut head = self.state.head();
        if head.size() + estimated_size > self.opts.max_memtable_size {
            self.switch_memtable(estimated_size).await;
            head = self.state.head();
        }

        for (cf, cf_entries) in entries.into_iter().enumerate() {
            if cf_entries.is_empty() {
                continue;
            }
            if let Err(err) = head.put_entries(cf, cf_entries) {
                // Insert failure means the head is unusable; there is no
                // way to make progress.
                tracing::error!(error = %err, "memtable insert failed");
                panic!("memtable insert failed: {err}");
            }
        }

        self.oracle.bump();
        for task in accepted {
            task.complete(Ok(()));
        }
    }

    /// Flattens the group into per-CF runs sorted by key. The sort is
    /// stable, so writes to the same key keep submission order and the
    /// later one wins in the memtable.
    fn build_mem_entries(&self, tasks: &mut [WriteTask]) -> (Vec<Vec<Entry>>, usize) {
        let mut entries: Vec<Vec<Entry>> = (0..self.opts.num_cfs).map(|_| Vec::new()).collect();
        let mut estimated_size = 0;
        for task in tasks {
            for batch_entry in task.batch.entries.drain(..) {
                let entry = Entry::new(batch_entry.key, batch_entry.value);
                estimated_size += entry.estimated_size();
                entries[batch_entry.cf].push(entry);
            }
        }
        for cf_entries in &mut entries {
            cf_entries.sort_by(|a, b| a.key.cmp(&b.key));
        }
        (entries, estimated_size)
    }

    /// Rotates the head memtable. The new head is sized to hold at least
    /// `min_size` so an oversized incoming group still fits; the displaced
    /// head is frozen and queued for flush, or dropped if it never
    /// received a write.
    pub(crate) async fn switch_memtable(&self, min_size: usize) {
        let new_size = self.opts.max_memtable_size.max(min_size);
        tracing::info!(new_size, "switching memtable");

        let new_head = Arc::new(CFTable::new(new_size, self.opts.num_cfs));
        let old_head = self.state.prepend_memtable(new_head);
        old_head.freeze();

        if old_head.is_empty() {
            self.state.remove_memtable(&old_head);
            return;
        }
        if self.flush_tx.send(old_head).await.is_err() {
            tracing::warn!("flush channel closed, frozen memtable not queued");
        }
    }

    fn execute_split_task(&self, mut task: SplitTask) {
        let requests = std::mem::take(&mut task.requests);
        let mut shards = self.state.shards();
        for request in &requests {
            let Some(shard) = shards.get_by_id(request.shard_id) else {
                let id = request.shard_id;
                task.complete(crate::errinput!("unknown shard {id}"));
                return;
            };
            let new_shards = match shard.split(&request.keys, || self.state.next_shard_id()) {
                Ok(new_shards) => new_shards,
                Err(err) => {
                    task.complete(Err(err));
                    return;
                }
            };
            shards = match shards.replace(&[shard], new_shards) {
                Ok(replaced) => Arc::new(replaced),
                Err(err) => {
                    task.complete(Err(err));
                    return;
                }
            };
        }
        self.state.publish_shards(shards);
        task.complete(Ok(()));
    }
}
