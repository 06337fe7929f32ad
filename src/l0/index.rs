//! Sidecar index for shard-partitioned L0 files.
//!
//! The index names the shards whose data the L0 file holds and where each
//! shard's blob ends within it. Little-endian layout:
//!
//! ```text
//! +--------------+---------------------+----------------------------+-----------------+
//! | numShards:u32| endOffset:u32 * N   | (len:u16, startKey) * N    | len:u16, endKey |
//! +--------------+---------------------+----------------------------+-----------------+
//! ```
//!
//! `endOffset[i]` is the cumulative byte offset just past shard i's blob
//! in the data file; `endOffset[N-1]` equals the data file length. Start
//! keys and end offsets are strictly increasing.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use crate::error::Result;
use crate::errdata;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct L0ShardIndex {
    pub start_keys: Vec<Vec<u8>>,
    pub end_key: Vec<u8>,
    pub end_offsets: Vec<u32>,
}

impl L0ShardIndex {
    pub fn num_shards(&self) -> usize {
        self.start_keys.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        debug_assert_eq!(self.start_keys.len(), self.end_offsets.len());
        let mut len = 4 + self.end_offsets.len() * 4 + 2 + self.end_key.len();
        for key in &self.start_keys {
            len += 2 + key.len();
        }

        let mut buf = Vec::with_capacity(len);
        buf.write_u32::<LittleEndian>(self.end_offsets.len() as u32)
            .unwrap();
        for end_offset in &self.end_offsets {
            buf.write_u32::<LittleEndian>(*end_offset).unwrap();
        }
        for start_key in &self.start_keys {
            buf.write_u16::<LittleEndian>(start_key.len() as u16).unwrap();
            buf.extend_from_slice(start_key);
        }
        buf.write_u16::<LittleEndian>(self.end_key.len() as u16)
            .unwrap();
        buf.extend_from_slice(&self.end_key);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let num_shards = cursor.read_u32::<LittleEndian>()? as usize;

        let mut end_offsets = Vec::with_capacity(num_shards);
        for _ in 0..num_shards {
            end_offsets.push(cursor.read_u32::<LittleEndian>()?);
        }
        for pair in end_offsets.windows(2) {
            if pair[0] >= pair[1] {
                return errdata!("l0 index end offsets are not strictly increasing");
            }
        }

        let mut start_keys = Vec::with_capacity(num_shards);
        for _ in 0..num_shards {
            let key_len = cursor.read_u16::<LittleEndian>()? as usize;
            let mut key = vec![0u8; key_len];
            cursor.read_exact(&mut key)?;
            start_keys.push(key);
        }
        for pair in start_keys.windows(2) {
            if pair[0] >= pair[1] {
                return errdata!("l0 index start keys are not strictly increasing");
            }
        }

        let end_key_len = cursor.read_u16::<LittleEndian>()? as usize;
        let mut end_key = vec![0u8; end_key_len];
        cursor.read_exact(&mut end_key)?;

        Ok(Self {
            start_keys,
            end_key,
            end_offsets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_roundtrip() {
        let index = L0ShardIndex {
            start_keys: vec![Vec::new(), b"m".to_vec(), b"x".to_vec()],
            end_key: b"z".to_vec(),
            end_offsets: vec![10, 20, 35],
        };

        let encoded = index.encode();
        let decoded = L0ShardIndex::decode(&encoded).expect("decode failed");
        assert_eq!(decoded, index);

        // Byte-for-byte stable re-encoding.
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn test_single_full_range_shard() {
        let index = L0ShardIndex {
            start_keys: vec![Vec::new()],
            end_key: Vec::new(),
            end_offsets: vec![4096],
        };

        let decoded = L0ShardIndex::decode(&index.encode()).unwrap();
        assert_eq!(decoded.num_shards(), 1);
        assert!(decoded.start_keys[0].is_empty());
        assert!(decoded.end_key.is_empty());
        assert_eq!(decoded.end_offsets, vec![4096]);
    }

    #[test]
    fn test_truncated_input() {
        let index = L0ShardIndex {
            start_keys: vec![Vec::new(), b"m".to_vec()],
            end_key: Vec::new(),
            end_offsets: vec![10, 20],
        };
        let encoded = index.encode();

        for len in 0..encoded.len() {
            assert!(
                L0ShardIndex::decode(&encoded[..len]).is_err(),
                "decode of {len}-byte prefix should fail"
            );
        }
    }

    #[test]
    fn test_rejects_non_increasing_offsets() {
        let index = L0ShardIndex {
            start_keys: vec![Vec::new(), b"m".to_vec()],
            end_key: Vec::new(),
            end_offsets: vec![20, 10],
        };
        assert!(matches!(
            L0ShardIndex::decode(&index.encode()),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_rejects_non_increasing_start_keys() {
        let index = L0ShardIndex {
            start_keys: vec![b"m".to_vec(), b"a".to_vec()],
            end_key: Vec::new(),
            end_offsets: vec![10, 20],
        };
        assert!(matches!(
            L0ShardIndex::decode(&index.encode()),
            Err(Error::InvalidData(_))
        ));
    }
}
