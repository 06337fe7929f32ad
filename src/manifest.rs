//! Append-only manifest log for L0 table metadata.
//!
//! The manifest is a WAL for engine structure rather than user data: every
//! flush appends a change record before the new table becomes observable,
//! so a restart can reconstruct the live table set. Layout:
//!
//! ```text
//! +------------------+
//! | Header (16 bytes)|
//! +------------------+
//! | Change record    |
//! +------------------+
//! | ...              |
//! +------------------+
//! ```
//!
//! Each record is framed `length:u32 | payload | crc32:u32` (big-endian
//! framing, CRC_32_ISCSI over the payload). The payload carries the head
//! commit version and the table change itself.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::Result;
use crate::errdata;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const MAGIC: &[u8; 8] = b"CNDR\0MF1";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 16;

const OP_CREATE: u8 = 0x01;
const OP_DELETE: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Create,
    Delete,
}

/// One manifest record: a table created at (or deleted from) a level,
/// stamped with the commit version the engine head had reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestChange {
    pub head_version: u64,
    pub id: u64,
    pub op: ChangeOp,
    pub level: u32,
}

impl ManifestChange {
    pub fn create_l0(id: u64, head_version: u64) -> Self {
        Self {
            head_version,
            id,
            op: ChangeOp::Create,
            level: 0,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(21);
        buf.write_u8(match self.op {
            ChangeOp::Create => OP_CREATE,
            ChangeOp::Delete => OP_DELETE,
        })
        .unwrap();
        buf.write_u64::<BigEndian>(self.head_version).unwrap();
        buf.write_u64::<BigEndian>(self.id).unwrap();
        buf.write_u32::<BigEndian>(self.level).unwrap();
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);
        let op = match cursor.read_u8()? {
            OP_CREATE => ChangeOp::Create,
            OP_DELETE => ChangeOp::Delete,
            other => return errdata!("invalid manifest change op: {other}"),
        };
        let head_version = cursor.read_u64::<BigEndian>()?;
        let id = cursor.read_u64::<BigEndian>()?;
        let level = cursor.read_u32::<BigEndian>()?;
        Ok(Self {
            head_version,
            id,
            op,
            level,
        })
    }
}

pub struct Manifest {
    file: File,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl Manifest {
    /// Opens or creates the manifest, writing and validating the header.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        if file.metadata()?.len() == 0 {
            let mut header = [0u8; HEADER_SIZE];
            header[0..8].copy_from_slice(MAGIC);
            (&mut header[8..12]).write_u32::<BigEndian>(VERSION)?;
            file.write_all(&header)?;
            file.sync_all()?;
        } else {
            let mut header = [0u8; HEADER_SIZE];
            file.read_exact(&mut header)?;
            Self::validate_header(&header)?;
        }

        file.seek(SeekFrom::End(0))?;
        let writer = BufWriter::new(file.try_clone()?);

        Ok(Self {
            file,
            writer: Mutex::new(writer),
            path,
        })
    }

    fn validate_header(header: &[u8; HEADER_SIZE]) -> Result<()> {
        if &header[0..8] != MAGIC {
            return errdata!("invalid manifest magic");
        }
        let version = BigEndian::read_u32(&header[8..12]);
        if version != VERSION {
            return errdata!("unsupported manifest version: {version}");
        }
        Ok(())
    }

    /// Appends one change record. Call `sync` to make it durable.
    pub fn append(&self, change: &ManifestChange) -> Result<()> {
        let payload = change.encode();
        let checksum = CRC32.checksum(&payload);

        let mut writer = self.writer.lock().unwrap();
        writer.write_u32::<BigEndian>(payload.len() as u32)?;
        writer.write_all(&payload)?;
        writer.write_u32::<BigEndian>(checksum)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.writer.lock().unwrap().flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Reads back every change record, verifying frames and checksums.
    pub fn replay(&self) -> Result<Vec<ManifestChange>> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;
        Self::validate_header(&header)?;

        let mut changes = Vec::new();
        loop {
            let len = match reader.read_u32::<BigEndian>() {
                Ok(len) => len as usize,
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            };
            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload)?;
            let checksum = reader.read_u32::<BigEndian>()?;
            if checksum != CRC32.checksum(&payload) {
                return errdata!("manifest record checksum mismatch");
            }
            changes.push(ManifestChange::decode(&payload)?);
        }
        Ok(changes)
    }
}
