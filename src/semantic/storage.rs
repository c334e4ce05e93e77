//! Binary storage for collections and export files.
//!
//! Both files share one layout, distinguished by magic (`BVCL` for the live
//! collection, `BVEX` for exports). All integers are little-endian.
//!
//! Header:
//! - magic: [u8; 4]
//! - version: u16 (1)
//! - metric: u8 (0 cosine, 1 l2, 2 ip)
//! - dimensions: u32 (0 while no vector has been stored)
//! - model name: u16 length + UTF-8
//! - entry_count: u64
//! - checksum: u32 (CRC32 of every header byte before it)
//!
//! Entries (repeated `entry_count` times):
//! - body length: u32
//! - body: id (u16 length + UTF-8), vector ([f32; dimensions]),
//!   text (u32 length + UTF-8), metadata (u32 length + JSON object)
//! - checksum: u32 (CRC32 of the body)

use std::io::Write;
use std::path::PathBuf;

use crate::semantic::index::{DistanceMetric, IndexEntry, VectorIndex};
use crate::semantic::types::Metadata;
use crate::storage::write_atomic_with;

pub const COLLECTION_MAGIC: [u8; 4] = *b"BVCL";
pub const EXPORT_MAGIC: [u8; 4] = *b"BVEX";

/// Current file format version
pub const FORMAT_VERSION: u16 = 1;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {found}, supported version {supported}")]
    VersionMismatch { found: u16, supported: u16 },

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,
}

/// Decoded file header.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version: u16,
    pub metric: DistanceMetric,
    pub dimensions: Option<usize>,
    pub model: String,
    pub entry_count: u64,
}

/// A vector file on disk, either a live collection or an export.
pub struct VectorFile {
    path: PathBuf,
    magic: [u8; 4],
}

impl VectorFile {
    pub fn collection(path: PathBuf) -> Self {
        Self {
            path,
            magic: COLLECTION_MAGIC,
        }
    }

    pub fn export(path: PathBuf) -> Self {
        Self {
            path,
            magic: EXPORT_MAGIC,
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write every entry of `index` atomically: temp file -> fsync -> rename.
    pub fn write(&self, model: &str, index: &VectorIndex) -> Result<(), StorageError> {
        let header = encode_header(
            self.magic,
            index.metric(),
            index.dimensions(),
            model,
            index.len() as u64,
        )?;

        write_atomic_with(&self.path, |writer| {
            writer.write_all(&header)?;
            let mut body = Vec::new();
            for (id, entry) in index.iter() {
                body.clear();
                encode_entry(&mut body, id, entry)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
                writer.write_all(&(body.len() as u32).to_le_bytes())?;
                writer.write_all(&body)?;
                writer.write_all(&crc32fast::hash(&body).to_le_bytes())?;
            }
            Ok(())
        })?;

        Ok(())
    }

    /// Read the header and every entry, verifying all checksums.
    pub fn read(&self) -> Result<(Header, Vec<(String, IndexEntry)>), StorageError> {
        let bytes = std::fs::read(&self.path)?;
        let mut reader = ByteReader::new(&bytes);
        let header = self.decode_header(&mut reader)?;

        let dimensions = header.dimensions.unwrap_or(0);
        if dimensions == 0 && header.entry_count > 0 {
            return Err(StorageError::InvalidFormat(
                "entries present but no dimension recorded".to_string(),
            ));
        }

        let mut entries = Vec::with_capacity(header.entry_count.min(1 << 20) as usize);
        for _ in 0..header.entry_count {
            let len = reader.u32()? as usize;
            let body = reader.take(len)?;
            let checksum = reader.u32()?;
            if crc32fast::hash(body) != checksum {
                return Err(StorageError::ChecksumMismatch);
            }
            entries.push(decode_entry(body, dimensions)?);
        }

        if !reader.is_at_end() {
            return Err(StorageError::InvalidFormat(
                "trailing bytes after last entry".to_string(),
            ));
        }

        Ok((header, entries))
    }

    fn decode_header(&self, reader: &mut ByteReader<'_>) -> Result<Header, StorageError> {
        let magic = reader.take(4)?;
        if magic != self.magic {
            return Err(StorageError::InvalidFormat(format!(
                "unexpected magic {:?}, expected {:?}",
                String::from_utf8_lossy(magic),
                String::from_utf8_lossy(&self.magic)
            )));
        }

        let version = reader.u16()?;
        // Version check first, a newer layout may not parse below
        if version > FORMAT_VERSION {
            return Err(StorageError::VersionMismatch {
                found: version,
                supported: FORMAT_VERSION,
            });
        }

        let metric_code = reader.u8()?;
        let dimensions = reader.u32()? as usize;
        let model_len = reader.u16()? as usize;
        let model_bytes = reader.take(model_len)?;
        let entry_count = reader.u64()?;
        let header_end = reader.position();
        let stored_checksum = reader.u32()?;

        if crc32fast::hash(reader.slice(0, header_end)) != stored_checksum {
            return Err(StorageError::ChecksumMismatch);
        }

        let metric = DistanceMetric::from_code(metric_code).ok_or_else(|| {
            StorageError::InvalidFormat(format!("unknown distance metric code {}", metric_code))
        })?;
        let model = String::from_utf8(model_bytes.to_vec())
            .map_err(|_| StorageError::InvalidFormat("model name is not UTF-8".to_string()))?;

        Ok(Header {
            version,
            metric,
            dimensions: (dimensions > 0).then_some(dimensions),
            model,
            entry_count,
        })
    }
}

fn encode_header(
    magic: [u8; 4],
    metric: DistanceMetric,
    dimensions: Option<usize>,
    model: &str,
    entry_count: u64,
) -> Result<Vec<u8>, StorageError> {
    let model_len = u16::try_from(model.len())
        .map_err(|_| StorageError::InvalidFormat("model name too long".to_string()))?;
    let dimensions = u32::try_from(dimensions.unwrap_or(0))
        .map_err(|_| StorageError::InvalidFormat("dimension too large".to_string()))?;

    let mut buf = Vec::with_capacity(25 + model.len());
    buf.extend_from_slice(&magic);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.push(metric.code());
    buf.extend_from_slice(&dimensions.to_le_bytes());
    buf.extend_from_slice(&model_len.to_le_bytes());
    buf.extend_from_slice(model.as_bytes());
    buf.extend_from_slice(&entry_count.to_le_bytes());

    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(buf)
}

fn encode_entry(buf: &mut Vec<u8>, id: &str, entry: &IndexEntry) -> Result<(), StorageError> {
    let id_len = u16::try_from(id.len())
        .map_err(|_| StorageError::InvalidFormat(format!("id too long: {} bytes", id.len())))?;
    buf.extend_from_slice(&id_len.to_le_bytes());
    buf.extend_from_slice(id.as_bytes());

    for value in &entry.vector {
        buf.extend_from_slice(&value.to_le_bytes());
    }

    buf.extend_from_slice(&(entry.text.len() as u32).to_le_bytes());
    buf.extend_from_slice(entry.text.as_bytes());

    let metadata = serde_json::to_vec(&entry.metadata)
        .map_err(|e| StorageError::InvalidFormat(format!("metadata encoding failed: {}", e)))?;
    buf.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
    buf.extend_from_slice(&metadata);
    Ok(())
}

fn decode_entry(body: &[u8], dimensions: usize) -> Result<(String, IndexEntry), StorageError> {
    let mut reader = ByteReader::new(body);

    let id_len = reader.u16()? as usize;
    let id = reader.utf8(id_len, "id")?;

    let mut vector = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        vector.push(f32::from_le_bytes(reader.array::<4>()?));
    }

    let text_len = reader.u32()? as usize;
    let text = reader.utf8(text_len, "text")?;

    let metadata_len = reader.u32()? as usize;
    let metadata: Metadata = serde_json::from_slice(reader.take(metadata_len)?)
        .map_err(|e| StorageError::InvalidFormat(format!("metadata for '{}': {}", id, e)))?;

    if !reader.is_at_end() {
        return Err(StorageError::InvalidFormat(format!(
            "entry '{}' has trailing bytes",
            id
        )));
    }

    Ok((
        id,
        IndexEntry {
            vector,
            text,
            metadata,
        },
    ))
}

/// Bounds-checked cursor over an in-memory buffer.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn is_at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn slice(&self, start: usize, end: usize) -> &'a [u8] {
        &self.buf[start..end]
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StorageError> {
        if self.buf.len() - self.pos < n {
            return Err(StorageError::InvalidFormat(
                "unexpected end of file".to_string(),
            ));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], StorageError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, StorageError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, StorageError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, StorageError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, StorageError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn utf8(&mut self, len: usize, what: &str) -> Result<String, StorageError> {
        String::from_utf8(self.take(len)?.to_vec())
            .map_err(|_| StorageError::InvalidFormat(format!("{} is not valid UTF-8", what)))
    }
}
