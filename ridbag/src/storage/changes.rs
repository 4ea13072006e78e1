//! Uncommitted page changes.
//!
//! An atomic operation never writes into a cached page. Each page it touches
//! gets a `PageChanges`: the committed page plus the byte ranges written so
//! far. Reads overlay the ranges on the committed bytes, so a typed view sees
//! the same values before and after the changes are applied in place. The
//! ranges are also exactly what the WAL logs for the page at commit.
//!
//! # Invariants
//!
//! - Ranges are non-overlapping and non-adjacent (writes are merged)
//! - Every range lies within the page

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::storage::buffer_pool::BufferPool;
use crate::storage::page::{Page, PageRead, PageWrite};

/// Byte-range diff over a committed page.
#[derive(Debug)]
pub struct PageChanges {
    base: Arc<Page>,
    /// Range start offset -> bytes written.
    ranges: BTreeMap<usize, Vec<u8>>,
}

impl PageChanges {
    /// Start tracking changes over `base`.
    #[must_use]
    pub const fn new(base: Arc<Page>) -> Self {
        Self {
            base,
            ranges: BTreeMap::new(),
        }
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The written ranges in offset order.
    pub fn ranges(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.ranges.iter().map(|(offset, bytes)| (*offset, bytes.as_slice()))
    }

    /// Write the ranges into `page`.
    pub fn apply_to(&self, page: &mut Page) {
        for (offset, bytes) in &self.ranges {
            page.set_bytes(*offset, bytes);
        }
    }

    /// Build the post-change page image.
    #[must_use]
    pub fn materialize(&self, pool: &Arc<BufferPool>) -> Page {
        let mut page = pool.page_zeroed();
        page.as_bytes_mut().copy_from_slice(self.base.as_bytes());
        self.apply_to(&mut page);
        page
    }
}

impl PageRead for PageChanges {
    fn page_size(&self) -> usize {
        self.base.page_size()
    }

    fn copy_bytes(&self, offset: usize, buf: &mut [u8]) {
        self.base.copy_bytes(offset, buf);

        let end = offset + buf.len();
        for (start, bytes) in self.ranges.range(..end) {
            let range_end = start + bytes.len();
            if range_end <= offset {
                continue;
            }
            let from = (*start).max(offset);
            let to = range_end.min(end);
            buf[from - offset..to - offset].copy_from_slice(&bytes[from - start..to - start]);
        }
    }
}

impl PageWrite for PageChanges {
    fn set_bytes(&mut self, offset: usize, bytes: &[u8]) {
        assert!(
            offset + bytes.len() <= self.page_size(),
            "write of {} bytes at {offset} exceeds page size {}",
            bytes.len(),
            self.page_size()
        );
        if bytes.is_empty() {
            return;
        }

        let mut start = offset;
        let mut end = offset + bytes.len();

        // Every range touching [offset, offset + len) merges into one.
        let touching: Vec<usize> = self
            .ranges
            .range(..=end)
            .filter(|(s, b)| *s + b.len() >= offset)
            .map(|(s, _)| *s)
            .collect();
        for s in &touching {
            if let Some(b) = self.ranges.get(s) {
                start = start.min(*s);
                end = end.max(s + b.len());
            }
        }

        let mut merged = vec![0u8; end - start];
        for s in touching {
            if let Some(b) = self.ranges.remove(&s) {
                merged[s - start..s - start + b.len()].copy_from_slice(&b);
            }
        }
        merged[offset - start..offset - start + bytes.len()].copy_from_slice(bytes);
        self.ranges.insert(start, merged);
    }
}
