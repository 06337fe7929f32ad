//! Shard-partitioned Level-0 tables.
//!
//! An L0 table is one immutable data file plus a sidecar index. The data
//! file is a concatenation of per-shard blobs ([`builder`]); the sidecar
//! ([`index`]) records the shard boundaries and cumulative blob offsets.
//! The opener reads the sidecar and memory-maps the data; neither file is
//! ever modified after the flush that produced them.

pub mod builder;
pub mod index;

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::Result;
use crate::errdata;
use index::L0ShardIndex;

pub use builder::ShardDataBuilder;

/// Data file name for a file id: `<fid:08>.sst`.
pub fn table_filename(dir: &Path, fid: u32) -> PathBuf {
    dir.join(format!("{fid:08}.sst"))
}

/// Sidecar index name for a data file: same stem, `.idx` extension.
pub fn index_filename(table_path: &Path) -> PathBuf {
    table_path.with_extension("idx")
}

/// An open, immutable L0 table.
pub struct L0Table {
    fid: u32,
    index: L0ShardIndex,
    data: Mmap,
}

impl L0Table {
    /// Opens a flushed table: decodes the sidecar, memory-maps the data
    /// file and checks that the index accounts for every byte of it.
    pub fn open(path: &Path, fid: u32) -> Result<Self> {
        let index_bytes = std::fs::read(index_filename(path))?;
        let index = L0ShardIndex::decode(&index_bytes)?;

        let file = File::open(path)?;
        let data = unsafe { Mmap::map(&file)? };

        match index.end_offsets.last() {
            Some(&last) if last as usize == data.len() => {}
            _ => {
                return errdata!(
                    "l0 table {fid} index does not cover its data file ({} bytes)",
                    data.len()
                )
            }
        }

        Ok(Self { fid, index, data })
    }

    pub fn fid(&self) -> u32 {
        self.fid
    }

    pub fn index(&self) -> &L0ShardIndex {
        &self.index
    }

    pub fn num_shards(&self) -> usize {
        self.index.num_shards()
    }

    /// The data-file size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// The blob for shard position `pos` (ascending start-key order).
    pub fn shard_data(&self, pos: usize) -> &[u8] {
        let start = if pos == 0 {
            0
        } else {
            self.index.end_offsets[pos - 1] as usize
        };
        let end = self.index.end_offsets[pos] as usize;
        &self.data[start..end]
    }

    /// Position of the shard covering `key`, if any shard in this table
    /// does.
    fn shard_pos(&self, key: &[u8]) -> Option<usize> {
        let pos = match self
            .index
            .start_keys
            .binary_search_by(|start| start.as_slice().cmp(key))
        {
            Ok(pos) => pos,
            Err(0) => return None,
            Err(pos) => pos - 1,
        };
        let last = self.index.start_keys.len() - 1;
        if pos == last && !self.index.end_key.is_empty() && key >= self.index.end_key.as_slice() {
            return None;
        }
        Some(pos)
    }

    /// Point lookup within one column family.
    pub fn get(&self, cf: usize, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(pos) = self.shard_pos(key) else {
            return Ok(None);
        };
        let section = builder::cf_section(self.shard_data(pos), cf)?;
        for entry in builder::SectionIter::new(section) {
            let (entry_key, value) = entry?;
            match entry_key.cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(value.to_vec())),
                std::cmp::Ordering::Greater => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Entries of one column family within one shard, in key order.
    pub fn iter_shard_cf(&self, pos: usize, cf: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let section = builder::cf_section(self.shard_data(pos), cf)?;
        builder::SectionIter::new(section)
            .map(|entry| entry.map(|(k, v)| (k.to_vec(), v.to_vec())))
            .collect()
    }
}

impl std::fmt::Debug for L0Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("L0Table")
            .field("fid", &self.fid)
            .field("shards", &self.index.num_shards())
            .field("size", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::Shard;
    use crate::testutil::TestDir;
    use std::io::Write;
    use std::sync::Arc;

    /// Writes a two-shard, one-CF table by hand and opens it.
    fn build_test_table(dir: &Path) -> Result<L0Table> {
        let mut left = ShardDataBuilder::new(Arc::new(Shard::new(1, Vec::new(), b"m".to_vec())), 1);
        left.add(0, b"a", b"1");
        left.add(0, b"c", b"3");
        let left_blob = left.finish();

        let mut right = ShardDataBuilder::new(Arc::new(Shard::new(2, b"m".to_vec(), Vec::new())), 1);
        right.add(0, b"n", b"2");
        let right_blob = right.finish();

        let index = L0ShardIndex {
            start_keys: vec![Vec::new(), b"m".to_vec()],
            end_key: Vec::new(),
            end_offsets: vec![
                left_blob.len() as u32,
                (left_blob.len() + right_blob.len()) as u32,
            ],
        };

        let path = table_filename(dir, 1);
        let mut data = File::create(&path)?;
        data.write_all(&left_blob)?;
        data.write_all(&right_blob)?;
        std::fs::write(index_filename(&path), index.encode())?;

        L0Table::open(&path, 1)
    }

    #[test]
    fn test_open_and_get() {
        let dir = TestDir::new();
        let table = build_test_table(dir.path()).unwrap();

        assert_eq!(table.fid(), 1);
        assert_eq!(table.num_shards(), 2);

        assert_eq!(table.get(0, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(table.get(0, b"c").unwrap(), Some(b"3".to_vec()));
        assert_eq!(table.get(0, b"n").unwrap(), Some(b"2".to_vec()));
        assert_eq!(table.get(0, b"b").unwrap(), None);
        assert_eq!(table.get(0, b"zz").unwrap(), None);
    }

    #[test]
    fn test_shard_iteration_order() {
        let dir = TestDir::new();
        let table = build_test_table(dir.path()).unwrap();

        // Shards in start order, keys ascending within each shard.
        let left = table.iter_shard_cf(0, 0).unwrap();
        assert_eq!(left[0].0, b"a");
        assert_eq!(left[1].0, b"c");
        let right = table.iter_shard_cf(1, 0).unwrap();
        assert_eq!(right[0].0, b"n");
        assert!(left.last().unwrap().0 < right[0].0);
    }

    #[test]
    fn test_open_rejects_mismatched_index() {
        let dir = TestDir::new();
        let path = table_filename(dir.path(), 7);
        std::fs::write(&path, b"some data bytes").unwrap();

        let index = L0ShardIndex {
            start_keys: vec![Vec::new()],
            end_key: Vec::new(),
            end_offsets: vec![3], // does not match the data length
        };
        std::fs::write(index_filename(&path), index.encode()).unwrap();

        assert!(L0Table::open(&path, 7).is_err());
    }
}
