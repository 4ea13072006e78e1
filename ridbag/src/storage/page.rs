//! Page types and the offset-relative accessor interface.
//!
//! Every file managed by the page cache is an array of equally sized pages.
//! The page size is chosen when the cache is opened (see `StoreConfig`), so
//! page buffers are boxed slices rather than fixed arrays.
//!
//! Typed page views (size-map buckets, tree nodes, ...) never touch a buffer
//! directly. They go through [`PageRead`] / [`PageWrite`], which are
//! implemented both by a raw [`Page`] and by the uncommitted diff layer in
//! [`crate::storage::changes`]. A view therefore decodes the same bytes
//! whether or not an atomic operation's changes have been applied in place.

use std::sync::Arc;

use crate::storage::buffer_pool::BufferPool;

/// Default page size in bytes (8KB).
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Smallest page size accepted by the cache.
pub const MIN_PAGE_SIZE: usize = 1024;

/// Largest page size accepted by the cache.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Index of a page within its file (0-indexed).
pub type PageIndex = u64;

/// Page type identifiers stored in page headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Size map entry point (page 0 of a size map file).
    SizeMapEntryPoint = 0x10,
    /// Size map bucket of counters.
    SizeMapBucket = 0x11,
    /// Shared tree metadata (page 0 of a tree file).
    TreeMeta = 0x20,
    /// Shared tree internal node.
    TreeInternal = 0x21,
    /// Shared tree leaf node.
    TreeLeaf = 0x22,
}

impl TryFrom<u8> for PageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(Self::SizeMapEntryPoint),
            0x11 => Ok(Self::SizeMapBucket),
            0x20 => Ok(Self::TreeMeta),
            0x21 => Ok(Self::TreeInternal),
            0x22 => Ok(Self::TreeLeaf),
            _ => Err(value),
        }
    }
}

/// Common page header present at the start of every durable page.
///
/// Layout:
/// - `page_type`: 1 byte
/// - `flags`: 1 byte
/// - `checksum`: 4 bytes (CRC32)
/// - `reserved`: 2 bytes
///
/// Total: 8 bytes
#[derive(Debug, Copy, Clone)]
pub struct PageHeader {
    pub page_type: PageType,
    pub flags: u8,
    pub checksum: u32,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 8;

    /// Set once the checksum field holds a valid CRC32 of the page.
    pub const FLAG_CHECKSUM: u8 = 0x01;

    /// Write a fresh header of the given type (no checksum yet).
    pub fn init(page: &mut impl PageWrite, page_type: PageType) {
        let header = Self {
            page_type,
            flags: 0,
            checksum: 0,
        };
        page.set_bytes(0, &header.to_bytes());
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.page_type as u8;
        buf[1] = self.flags;
        buf[2..6].copy_from_slice(&self.checksum.to_le_bytes());
        // bytes 6-7 reserved
        buf
    }

    /// Deserialize a header from bytes.
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Result<Self, PageError> {
        let page_type = PageType::try_from(bytes[0]).map_err(PageError::InvalidPageType)?;
        let flags = bytes[1];
        let checksum = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);

        Ok(Self {
            page_type,
            flags,
            checksum,
        })
    }

    /// Read the header of a page.
    pub fn read(page: &impl PageRead) -> Result<Self, PageError> {
        let mut bytes = [0u8; Self::SIZE];
        page.copy_bytes(0, &mut bytes);
        Self::from_bytes(bytes)
    }

    /// Check that a page carries the expected type.
    pub fn expect_type(page: &impl PageRead, expected: PageType) -> Result<(), PageError> {
        let actual = Self::read(page)?.page_type;
        if actual == expected {
            Ok(())
        } else {
            Err(PageError::WrongPageType { expected, actual })
        }
    }
}

/// Offset-relative read access to a page's bytes.
///
/// Offsets are byte offsets from the start of the page. Reading past the end
/// of the page is a logic error and panics, like slice indexing.
pub trait PageRead {
    /// Size of the page in bytes.
    fn page_size(&self) -> usize;

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    fn copy_bytes(&self, offset: usize, buf: &mut [u8]);

    fn get_u8(&self, offset: usize) -> u8 {
        let mut buf = [0u8; 1];
        self.copy_bytes(offset, &mut buf);
        buf[0]
    }

    fn get_u16(&self, offset: usize) -> u16 {
        let mut buf = [0u8; 2];
        self.copy_bytes(offset, &mut buf);
        u16::from_le_bytes(buf)
    }

    fn get_i32(&self, offset: usize) -> i32 {
        let mut buf = [0u8; 4];
        self.copy_bytes(offset, &mut buf);
        i32::from_le_bytes(buf)
    }

    fn get_u32(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        self.copy_bytes(offset, &mut buf);
        u32::from_le_bytes(buf)
    }

    fn get_i64(&self, offset: usize) -> i64 {
        let mut buf = [0u8; 8];
        self.copy_bytes(offset, &mut buf);
        i64::from_le_bytes(buf)
    }

    fn get_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        self.copy_bytes(offset, &mut buf);
        u64::from_le_bytes(buf)
    }
}

/// Offset-relative write access to a page's bytes.
pub trait PageWrite: PageRead {
    /// Overwrite the bytes starting at `offset`.
    fn set_bytes(&mut self, offset: usize, bytes: &[u8]);

    fn set_u8(&mut self, offset: usize, value: u8) {
        self.set_bytes(offset, &[value]);
    }

    fn set_u16(&mut self, offset: usize, value: u16) {
        self.set_bytes(offset, &value.to_le_bytes());
    }

    fn set_i32(&mut self, offset: usize, value: i32) {
        self.set_bytes(offset, &value.to_le_bytes());
    }

    fn set_u32(&mut self, offset: usize, value: u32) {
        self.set_bytes(offset, &value.to_le_bytes());
    }

    fn set_i64(&mut self, offset: usize, value: i64) {
        self.set_bytes(offset, &value.to_le_bytes());
    }

    fn set_u64(&mut self, offset: usize, value: u64) {
        self.set_bytes(offset, &value.to_le_bytes());
    }
}

impl<T: PageRead + ?Sized> PageRead for &T {
    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn copy_bytes(&self, offset: usize, buf: &mut [u8]) {
        (**self).copy_bytes(offset, buf);
    }
}

impl<T: PageRead + ?Sized> PageRead for &mut T {
    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn copy_bytes(&self, offset: usize, buf: &mut [u8]) {
        (**self).copy_bytes(offset, buf);
    }
}

impl<T: PageWrite + ?Sized> PageWrite for &mut T {
    fn set_bytes(&mut self, offset: usize, bytes: &[u8]) {
        (**self).set_bytes(offset, bytes);
    }
}

/// A raw page buffer.
///
/// Buffers leased from a [`BufferPool`] are handed back to it on drop.
pub struct Page {
    data: Box<[u8]>,
    pool: Option<Arc<BufferPool>>,
}

impl Page {
    /// Create a new zeroed page that is not backed by a pool.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            data: vec![0u8; page_size].into_boxed_slice(),
            pool: None,
        }
    }

    /// Wrap a buffer leased from `pool`; the buffer is returned on drop.
    #[must_use]
    pub(crate) fn from_pool(data: Box<[u8]>, pool: Arc<BufferPool>) -> Self {
        Self {
            data,
            pool: Some(pool),
        }
    }

    /// Size of the page in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the page has no bytes (only true for a page moved out on drop).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the raw page data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable access to the raw page data.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Compute CRC32 checksum of the page data (excluding the checksum field itself).
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[0..2]); // page_type + flags
        hasher.update(&[0u8; 4]); // zero out checksum field
        hasher.update(&self.data[6..]);
        hasher.finalize()
    }

    /// Stamp the checksum into the header before the page goes to disk.
    pub fn seal(&mut self) {
        let flags = self.data[1] | PageHeader::FLAG_CHECKSUM;
        self.data[1] = flags;
        let checksum = self.compute_checksum();
        self.data[2..6].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Verify the checksum of a page read from disk.
    ///
    /// Pages that were never sealed (all-zero tails of a file) pass.
    pub fn verify(&self) -> Result<(), PageError> {
        if self.data[1] & PageHeader::FLAG_CHECKSUM == 0 {
            return Ok(());
        }
        let expected = u32::from_le_bytes([self.data[2], self.data[3], self.data[4], self.data[5]]);
        let actual = self.compute_checksum();
        if expected == actual {
            Ok(())
        } else {
            Err(PageError::ChecksumMismatch { expected, actual })
        }
    }
}

impl PageRead for Page {
    fn page_size(&self) -> usize {
        self.data.len()
    }

    fn copy_bytes(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
    }
}

impl PageWrite for Page {
    fn set_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.return_buffer(std::mem::take(&mut self.data));
        }
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = self.data.len().min(16);
        f.debug_struct("Page")
            .field("len", &self.data.len())
            .field("first_bytes", &&self.data[..shown])
            .finish_non_exhaustive()
    }
}

/// Errors related to page operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    /// Invalid page type byte.
    InvalidPageType(u8),
    /// A typed view was opened over a page of another type.
    WrongPageType { expected: PageType, actual: PageType },
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageType(v) => write!(f, "invalid page type: 0x{v:02x}"),
            Self::WrongPageType { expected, actual } => {
                write!(f, "wrong page type: expected {expected:?}, found {actual:?}")
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for PageError {}
