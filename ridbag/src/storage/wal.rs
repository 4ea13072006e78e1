//! Write-Ahead Log (WAL) implementation.
//!
//! The WAL makes atomic operations crash-recoverable. At commit, the file
//! deletions of the operation are appended, then its file creations and page
//! changes, followed by a commit marker, and the log is synced before any data page is
//! touched. Once the pages are installed and synced the log is truncated.
//!
//! # Log Record Format
//!
//! Each record has the following layout:
//! ```text
//! +----------+--------------------------------------------------+
//! | 0-3      | record_length (4 bytes, includes header+payload) |
//! | 4        | record_type (1 byte)                             |
//! | 5-12     | operation_id (8 bytes)                           |
//! | 13-N     | payload (variable, depends on type)              |
//! | N-N+3    | CRC32 checksum (4 bytes)                         |
//! +----------+--------------------------------------------------+
//! ```
//!
//! A record whose length or checksum does not check out ends the log: it is
//! the torn tail of a write interrupted by a crash.

// record lengths, range offsets and name lengths fit in u32/u16 by construction
#![allow(clippy::cast_possible_truncation)]

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::storage::cache::FileId;
use crate::storage::page::PageIndex;

/// Name of the log file inside the data directory.
pub const WAL_FILE_NAME: &str = "ridbag.wal";

/// Log record header size (before payload).
/// `record_length` (4) + `record_type` (1) + `operation_id` (8) = 13 bytes
const RECORD_HEADER_SIZE: usize = 13;

/// CRC32 checksum size at end of record.
const CHECKSUM_SIZE: usize = 4;

/// Identifier of one atomic operation.
pub type OperationId = u64;

/// Log record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// A data file was created.
    FileCreated = 0x01,
    /// Byte ranges of one page changed.
    PageUpdate = 0x02,
    /// A data file was deleted.
    FileDeleted = 0x03,
    /// Operation commit marker.
    Commit = 0x04,
}

impl TryFrom<u8> for LogRecordType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::FileCreated),
            0x02 => Ok(Self::PageUpdate),
            0x03 => Ok(Self::FileDeleted),
            0x04 => Ok(Self::Commit),
            _ => Err(value),
        }
    }
}

/// One changed byte range of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRange {
    pub offset: u32,
    pub bytes: Vec<u8>,
}

/// Payload for different log record types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecordPayload {
    /// File created under a fixed id.
    FileCreated { file_id: FileId, name: String },
    /// Page after-image as a list of changed ranges.
    PageUpdate {
        file_id: FileId,
        page_index: PageIndex,
        ranges: Vec<PageRange>,
    },
    /// File deleted.
    FileDeleted { file_id: FileId },
    /// Commit - no additional data.
    Commit,
}

impl LogRecordPayload {
    /// Get the record type for this payload.
    #[must_use]
    pub const fn record_type(&self) -> LogRecordType {
        match self {
            Self::FileCreated { .. } => LogRecordType::FileCreated,
            Self::PageUpdate { .. } => LogRecordType::PageUpdate,
            Self::FileDeleted { .. } => LogRecordType::FileDeleted,
            Self::Commit => LogRecordType::Commit,
        }
    }

    /// Serialize the payload to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::FileCreated { file_id, name } => {
                let mut bytes = Vec::with_capacity(6 + name.len());
                bytes.extend_from_slice(&file_id.to_le_bytes());
                bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
                bytes.extend_from_slice(name.as_bytes());
                bytes
            }
            Self::PageUpdate {
                file_id,
                page_index,
                ranges,
            } => {
                let mut bytes = Vec::new();
                bytes.extend_from_slice(&file_id.to_le_bytes());
                bytes.extend_from_slice(&page_index.to_le_bytes());
                bytes.extend_from_slice(&(ranges.len() as u32).to_le_bytes());
                for range in ranges {
                    bytes.extend_from_slice(&range.offset.to_le_bytes());
                    bytes.extend_from_slice(&(range.bytes.len() as u32).to_le_bytes());
                    bytes.extend_from_slice(&range.bytes);
                }
                bytes
            }
            Self::FileDeleted { file_id } => file_id.to_le_bytes().to_vec(),
            Self::Commit => Vec::new(),
        }
    }

    /// Deserialize a payload from bytes.
    pub fn from_bytes(record_type: LogRecordType, bytes: &[u8]) -> Result<Self, WalError> {
        let mut reader = PayloadReader { bytes, offset: 0 };
        let payload = match record_type {
            LogRecordType::FileCreated => {
                let file_id = reader.u32()?;
                let len = usize::from(reader.u16()?);
                let name = std::str::from_utf8(reader.take(len)?)
                    .map_err(|_| WalError::CorruptRecord)?
                    .to_string();
                Self::FileCreated { file_id, name }
            }
            LogRecordType::PageUpdate => {
                let file_id = reader.u32()?;
                let page_index = reader.u64()?;
                let count = reader.u32()?;
                let mut ranges = Vec::new();
                for _ in 0..count {
                    let offset = reader.u32()?;
                    let len = reader.u32()? as usize;
                    ranges.push(PageRange {
                        offset,
                        bytes: reader.take(len)?.to_vec(),
                    });
                }
                Self::PageUpdate {
                    file_id,
                    page_index,
                    ranges,
                }
            }
            LogRecordType::FileDeleted => Self::FileDeleted {
                file_id: reader.u32()?,
            },
            LogRecordType::Commit => Self::Commit,
        };

        if reader.offset != bytes.len() {
            return Err(WalError::CorruptRecord);
        }
        Ok(payload)
    }
}

struct PayloadReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], WalError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(WalError::CorruptRecord)?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, WalError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, WalError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, WalError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

/// A complete log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Atomic operation that wrote this record.
    pub operation_id: OperationId,
    /// The record payload.
    pub payload: LogRecordPayload,
}

impl LogRecord {
    /// Create a new log record.
    #[must_use]
    pub const fn new(operation_id: OperationId, payload: LogRecordPayload) -> Self {
        Self {
            operation_id,
            payload,
        }
    }

    /// Serialize this record to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload_bytes = self.payload.to_bytes();
        let total_len = RECORD_HEADER_SIZE + payload_bytes.len() + CHECKSUM_SIZE;

        let mut bytes = Vec::with_capacity(total_len);

        // Record length (4 bytes)
        bytes.extend_from_slice(&(total_len as u32).to_le_bytes());

        // Record type (1 byte)
        bytes.push(self.payload.record_type() as u8);

        // Operation ID (8 bytes)
        bytes.extend_from_slice(&self.operation_id.to_le_bytes());

        // Payload (variable)
        bytes.extend_from_slice(&payload_bytes);

        // CRC32 checksum (4 bytes) - computed over everything before it
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());

        bytes
    }

    /// Deserialize a record from bytes.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), WalError> {
        if bytes.len() < RECORD_HEADER_SIZE + CHECKSUM_SIZE {
            return Err(WalError::CorruptRecord);
        }

        let record_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;

        if record_len < RECORD_HEADER_SIZE + CHECKSUM_SIZE || record_len > bytes.len() {
            return Err(WalError::CorruptRecord);
        }

        // Verify checksum
        let stored_checksum = u32::from_le_bytes([
            bytes[record_len - 4],
            bytes[record_len - 3],
            bytes[record_len - 2],
            bytes[record_len - 1],
        ]);
        let computed_checksum = crc32fast::hash(&bytes[..record_len - 4]);
        if stored_checksum != computed_checksum {
            return Err(WalError::ChecksumMismatch {
                expected: stored_checksum,
                actual: computed_checksum,
            });
        }

        let record_type = LogRecordType::try_from(bytes[4]).map_err(WalError::InvalidRecordType)?;

        let operation_id = u64::from_le_bytes([
            bytes[5], bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11], bytes[12],
        ]);

        let payload_bytes = &bytes[RECORD_HEADER_SIZE..record_len - CHECKSUM_SIZE];
        let payload = LogRecordPayload::from_bytes(record_type, payload_bytes)?;

        Ok((
            Self {
                operation_id,
                payload,
            },
            record_len,
        ))
    }
}

/// Result of scanning the log.
#[derive(Debug, Default)]
pub struct WalScan {
    /// Every intact record, in log order.
    pub records: Vec<LogRecord>,
    /// Whether the scan stopped at a torn or corrupt record.
    pub torn_tail: bool,
}

/// Append-only log file.
pub struct Wal {
    file: File,
    sync_on_commit: bool,
}

impl Wal {
    /// Open the log at `path`, creating an empty one if missing.
    pub fn open(path: &Path, sync_on_commit: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(WalError::Io)?;

        Ok(Self {
            file,
            sync_on_commit,
        })
    }

    /// Append records at the end of the log.
    pub fn append(&mut self, records: &[LogRecord]) -> Result<(), WalError> {
        let mut bytes = Vec::new();
        for record in records {
            bytes.extend_from_slice(&record.to_bytes());
        }
        self.file.seek(SeekFrom::End(0)).map_err(WalError::Io)?;
        self.file.write_all(&bytes).map_err(WalError::Io)?;
        Ok(())
    }

    /// Sync the log to disk (skipped when commits are not synced).
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.flush().map_err(WalError::Io)?;
        if self.sync_on_commit {
            self.file.sync_data().map_err(WalError::Io)?;
        }
        Ok(())
    }

    /// Read every intact record from the start of the log.
    pub fn scan(&mut self) -> Result<WalScan, WalError> {
        let mut bytes = Vec::new();
        self.file.seek(SeekFrom::Start(0)).map_err(WalError::Io)?;
        self.file.read_to_end(&mut bytes).map_err(WalError::Io)?;

        let mut scan = WalScan::default();
        let mut offset = 0;
        while offset < bytes.len() {
            match LogRecord::from_bytes(&bytes[offset..]) {
                Ok((record, consumed)) => {
                    scan.records.push(record);
                    offset += consumed;
                }
                Err(_) => {
                    scan.torn_tail = true;
                    break;
                }
            }
        }

        Ok(scan)
    }

    /// Discard every record.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        self.truncate_to(0)
    }

    /// Cut the log back to `offset`, dropping everything appended after it.
    pub fn truncate_to(&mut self, offset: u64) -> Result<(), WalError> {
        self.file.set_len(offset).map_err(WalError::Io)?;
        self.file.seek(SeekFrom::Start(offset)).map_err(WalError::Io)?;
        if self.sync_on_commit {
            self.file.sync_data().map_err(WalError::Io)?;
        }
        Ok(())
    }

    /// Offset the next append starts at.
    pub fn end_offset(&self) -> Result<u64, WalError> {
        Ok(self.file.metadata().map_err(WalError::Io)?.len())
    }
}

/// Errors that can occur during WAL operations.
#[derive(Debug)]
pub enum WalError {
    /// I/O error.
    Io(std::io::Error),
    /// Corrupt log record.
    CorruptRecord,
    /// Invalid record type byte.
    InvalidRecordType(u8),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for WalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "WAL I/O error: {e}"),
            Self::CorruptRecord => write!(f, "corrupt WAL record"),
            Self::InvalidRecordType(t) => write!(f, "invalid WAL record type: 0x{t:02x}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(
                    f,
                    "WAL checksum mismatch: expected 0x{expected:08x}, got 0x{actual:08x}"
                )
            }
        }
    }
}

impl std::error::Error for WalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}
