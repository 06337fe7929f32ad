//! Builder for the per-shard blobs inside an L0 data file.
//!
//! Each shard's contiguous range in the data file is one self-contained
//! blob holding every column family's entries for that shard.
//! Little-endian layout:
//!
//! ```text
//! +-----------+--------------------+---------------------+
//! | numCFs:u32| cfEndOffset:u32 * C| cf sections         |
//! +-----------+--------------------+---------------------+
//! ```
//!
//! `cfEndOffset[c]` is the cumulative end of section c relative to the end
//! of the header. A section is a run of entries, each
//! `len:u16, key, len:u32, value`, in strictly increasing key order. An
//! empty column family has a zero-length section.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::sync::Arc;

use crate::error::Result;
use crate::errdata;
use crate::shard::Shard;

/// Accumulates one shard's entries across all column families during a
/// flush, then finalizes them into a single blob.
pub struct ShardDataBuilder {
    shard: Arc<Shard>,
    sections: Vec<Vec<u8>>,
}

impl ShardDataBuilder {
    pub fn new(shard: Arc<Shard>, num_cfs: usize) -> Self {
        Self {
            shard,
            sections: vec![Vec::new(); num_cfs],
        }
    }

    pub fn shard(&self) -> &Arc<Shard> {
        &self.shard
    }

    /// Appends an entry to the given column family's section. Callers
    /// append in ascending key order per CF.
    pub fn add(&mut self, cf: usize, key: &[u8], value: &[u8]) {
        let section = &mut self.sections[cf];
        section.write_u16::<LittleEndian>(key.len() as u16).unwrap();
        section.extend_from_slice(key);
        section.write_u32::<LittleEndian>(value.len() as u32).unwrap();
        section.extend_from_slice(value);
    }

    /// Finalizes the builder into the on-disk blob.
    pub fn finish(self) -> Vec<u8> {
        let header_len = 4 + self.sections.len() * 4;
        let body_len: usize = self.sections.iter().map(|s| s.len()).sum();

        let mut blob = Vec::with_capacity(header_len + body_len);
        blob.write_u32::<LittleEndian>(self.sections.len() as u32)
            .unwrap();
        let mut end = 0u32;
        for section in &self.sections {
            end += section.len() as u32;
            blob.write_u32::<LittleEndian>(end).unwrap();
        }
        for section in &self.sections {
            blob.extend_from_slice(section);
        }
        blob
    }
}

/// Borrows the section for one column family out of a finished blob.
pub(crate) fn cf_section(blob: &[u8], cf: usize) -> Result<&[u8]> {
    if blob.len() < 4 {
        return errdata!("shard blob shorter than its header");
    }
    let num_cfs = LittleEndian::read_u32(blob) as usize;
    if cf >= num_cfs {
        return errdata!("column family {cf} out of range, blob has {num_cfs}");
    }
    let header_len = 4 + num_cfs * 4;
    if blob.len() < header_len {
        return errdata!("shard blob shorter than its header");
    }
    let end_of = |i: usize| LittleEndian::read_u32(&blob[4 + i * 4..]) as usize;
    let start = if cf == 0 { 0 } else { end_of(cf - 1) };
    let end = end_of(cf);
    if start > end || header_len + end > blob.len() {
        return errdata!("shard blob section offsets out of bounds");
    }
    Ok(&blob[header_len + start..header_len + end])
}

/// Iterates the entries of one CF section.
pub(crate) struct SectionIter<'a> {
    data: &'a [u8],
}

impl<'a> SectionIter<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for SectionIter<'a> {
    type Item = Result<(&'a [u8], &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        if self.data.len() < 2 {
            self.data = &[];
            return Some(errdata!("truncated entry header in shard blob"));
        }
        let key_len = LittleEndian::read_u16(self.data) as usize;
        if self.data.len() < 2 + key_len + 4 {
            self.data = &[];
            return Some(errdata!("truncated entry in shard blob"));
        }
        let key = &self.data[2..2 + key_len];
        let value_len = LittleEndian::read_u32(&self.data[2 + key_len..]) as usize;
        let rest = &self.data[2 + key_len + 4..];
        if rest.len() < value_len {
            self.data = &[];
            return Some(errdata!("truncated entry in shard blob"));
        }
        let value = &rest[..value_len];
        self.data = &rest[value_len..];
        Some(Ok((key, value)))
    }
}
