//! Composite keys of the shared collection trees.
//!
//! Many collections share one tree per cluster. Every entry is keyed by
//! `(collection_id, cluster, position)`: the collection the entry belongs to,
//! followed by the record it points at. Keys compare lexicographically with
//! signed comparison at each level, so all entries of one collection form the
//! contiguous range returned by [`CompositeKey::collection_range`].
//!
//! # Binary format
//!
//! ```text
//! +-----------------+-------------+----------------+
//! | collection_id   | cluster     | position       |
//! | i64 LE (8)      | i32 LE (4)  | i64 LE (8)     |
//! +-----------------+-------------+----------------+
//! ```
//!
//! Fixed width, no padding, no length prefix.

use crate::storage::{PageRead, PageWrite};

/// Collection identifier.
pub type CollectionId = i64;

/// Record reference: the per-collection part of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordRef {
    pub cluster: i32,
    pub position: i64,
}

impl RecordRef {
    #[must_use]
    pub const fn new(cluster: i32, position: i64) -> Self {
        Self { cluster, position }
    }

    /// Smallest possible record reference.
    pub const MIN: Self = Self::new(i32::MIN, i64::MIN);

    /// Largest possible record reference.
    pub const MAX: Self = Self::new(i32::MAX, i64::MAX);
}

impl std::fmt::Display for RecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}:{}", self.cluster, self.position)
    }
}

/// Key of one entry in a shared tree.
///
/// Field order matters: the derived `Ord` compares `collection_id`, then
/// `cluster`, then `position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeKey {
    pub collection_id: CollectionId,
    pub cluster: i32,
    pub position: i64,
}

impl CompositeKey {
    /// Serialized size in bytes.
    pub const SERIALIZED_SIZE: usize = 20;

    #[must_use]
    pub const fn new(collection_id: CollectionId, cluster: i32, position: i64) -> Self {
        Self {
            collection_id,
            cluster,
            position,
        }
    }

    /// Key of `record` within collection `collection_id`.
    #[must_use]
    pub const fn of(collection_id: CollectionId, record: RecordRef) -> Self {
        Self::new(collection_id, record.cluster, record.position)
    }

    /// The record part of the key.
    #[must_use]
    pub const fn record(&self) -> RecordRef {
        RecordRef::new(self.cluster, self.position)
    }

    /// Inclusive bounds covering every key of a collection.
    #[must_use]
    pub const fn collection_range(collection_id: CollectionId) -> (Self, Self) {
        (
            Self::of(collection_id, RecordRef::MIN),
            Self::of(collection_id, RecordRef::MAX),
        )
    }

    /// Number of bytes this key encodes to.
    #[must_use]
    pub const fn serialized_size(&self) -> usize {
        Self::SERIALIZED_SIZE
    }

    /// Size of the key encoded at `offset` in `buf`.
    ///
    /// The encoding is fixed width, so this only checks that a whole key fits.
    pub fn size_in(buf: &[u8], offset: usize) -> Result<usize, KeyError> {
        check_bounds(buf.len(), offset)?;
        Ok(Self::SERIALIZED_SIZE)
    }

    /// Encode into `buf` at `offset`.
    pub fn encode_into(&self, buf: &mut [u8], offset: usize) -> Result<(), KeyError> {
        check_bounds(buf.len(), offset)?;
        buf[offset..offset + 8].copy_from_slice(&self.collection_id.to_le_bytes());
        buf[offset + 8..offset + 12].copy_from_slice(&self.cluster.to_le_bytes());
        buf[offset + 12..offset + 20].copy_from_slice(&self.position.to_le_bytes());
        Ok(())
    }

    /// Decode from `buf` at `offset`.
    pub fn decode(buf: &[u8], offset: usize) -> Result<Self, KeyError> {
        check_bounds(buf.len(), offset)?;
        let mut bytes = [0u8; Self::SERIALIZED_SIZE];
        bytes.copy_from_slice(&buf[offset..offset + Self::SERIALIZED_SIZE]);
        Ok(Self::from_bytes(&bytes))
    }

    /// Encode to a fixed-size array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SERIALIZED_SIZE] {
        let mut bytes = [0u8; Self::SERIALIZED_SIZE];
        bytes[0..8].copy_from_slice(&self.collection_id.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.cluster.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.position.to_le_bytes());
        bytes
    }

    /// Decode from a fixed-size array.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; Self::SERIALIZED_SIZE]) -> Self {
        let mut id = [0u8; 8];
        let mut cluster = [0u8; 4];
        let mut position = [0u8; 8];
        id.copy_from_slice(&bytes[0..8]);
        cluster.copy_from_slice(&bytes[8..12]);
        position.copy_from_slice(&bytes[12..20]);
        Self::new(
            i64::from_le_bytes(id),
            i32::from_le_bytes(cluster),
            i64::from_le_bytes(position),
        )
    }

    /// Decode from a page, or from a page seen through uncommitted changes.
    pub fn read_from(page: &impl PageRead, offset: usize) -> Result<Self, KeyError> {
        check_bounds(page.page_size(), offset)?;
        let mut bytes = [0u8; Self::SERIALIZED_SIZE];
        page.copy_bytes(offset, &mut bytes);
        Ok(Self::from_bytes(&bytes))
    }

    /// Encode into a page.
    pub fn write_to(&self, page: &mut impl PageWrite, offset: usize) -> Result<(), KeyError> {
        check_bounds(page.page_size(), offset)?;
        page.set_bytes(offset, &self.to_bytes());
        Ok(())
    }
}

impl std::fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, #{}:{})",
            self.collection_id, self.cluster, self.position
        )
    }
}

const fn check_bounds(len: usize, offset: usize) -> Result<(), KeyError> {
    if offset > len || len - offset < CompositeKey::SERIALIZED_SIZE {
        return Err(KeyError::BufferTooSmall {
            offset,
            available: len.saturating_sub(offset),
        });
    }
    Ok(())
}

/// Errors from key encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Fewer than `SERIALIZED_SIZE` bytes at the offset.
    BufferTooSmall { offset: usize, available: usize },
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BufferTooSmall { offset, available } => write!(
                f,
                "composite key at offset {offset} needs {} bytes, {available} available",
                CompositeKey::SERIALIZED_SIZE
            ),
        }
    }
}

impl std::error::Error for KeyError {}
