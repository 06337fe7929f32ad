//! CinderDB is a sharded LSM-tree key/value write-path engine.
//!
//! Incoming write batches funnel through a single writer loop that
//! coalesces them into per-column-family runs and inserts them into the
//! head memtable. When the head fills up it is switched out, frozen, and
//! handed to the flush worker, which partitions it by shard and writes a
//! Level-0 data file with a sidecar index. Shard-range splits travel the
//! same ingest channel as writes, so they serialize naturally against
//! them. The memtable stack, the L0 set and the shard map are all
//! published as immutable snapshots; readers grab each once per operation
//! and never take locks against the write path.

pub mod config;
pub mod db;
pub mod direct;
pub mod error;
pub mod flock;
pub mod flush;
pub mod l0;
pub mod manifest;
pub mod memtable;
pub mod oracle;
pub mod shard;
pub mod state;
pub mod write;

#[cfg(test)]
mod testutil;

pub use config::Options;
pub use db::ShardDb;
pub use error::{Error, Result};
pub use l0::index::L0ShardIndex;
pub use l0::L0Table;
pub use memtable::{CFTable, Entry};
pub use shard::{Shard, ShardMap};
pub use write::{SplitRequest, WriteBatch};
