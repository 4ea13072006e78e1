//! Buffer pool for page buffers.
//!
//! The pool hands out page-sized buffers and takes them back when a [`Page`]
//! is dropped, so pages evicted from the change layer or replaced in the
//! cache recycle their allocation.
//!
//! # Design
//!
//! - Buffers are allocated lazily, up to `capacity`
//! - Uses a free list (Vec) for O(1) lease/return
//! - Returns buffers automatically via RAII (Drop trait on Page)
//! - Thread-safe: uses Mutex for internal synchronization
//!
//! # Invariants
//!
//! - Every buffer in the pool is exactly `page_size` bytes
//! - `free_list.len() + leased <= capacity`

use std::sync::{Arc, Mutex};

use crate::storage::page::Page;

struct PoolState {
    free_list: Vec<Box<[u8]>>,
    /// Buffers allocated so far (leased + free).
    allocated: usize,
}

/// A buffer pool of page-sized buffers.
///
/// When the pool is exhausted callers fall back to unpooled pages, see
/// [`BufferPool::page_zeroed`].
pub struct BufferPool {
    state: Mutex<PoolState>,
    page_size: usize,
    capacity: usize,
}

impl BufferPool {
    /// Create a new buffer pool.
    ///
    /// # Panics
    /// Panics if capacity or page size is 0.
    #[must_use]
    pub fn new(page_size: usize, capacity: usize) -> Arc<Self> {
        assert!(capacity > 0, "Buffer pool capacity must be positive");
        assert!(page_size > 0, "Buffer pool page size must be positive");

        Arc::new(Self {
            state: Mutex::new(PoolState {
                free_list: Vec::new(),
                allocated: 0,
            }),
            page_size,
            capacity,
        })
    }

    /// Lease a buffer from the pool.
    ///
    /// # Returns
    /// - `Some(buffer)` if a buffer is free or the pool can still grow
    /// - `None` if the pool is exhausted
    ///
    /// Buffer contents are undefined (may contain stale data).
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub fn lease(&self) -> Option<Box<[u8]>> {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(buffer) = state.free_list.pop() {
            return Some(buffer);
        }
        if state.allocated < self.capacity {
            state.allocated += 1;
            return Some(vec![0u8; self.page_size].into_boxed_slice());
        }
        None
    }

    /// Lease a zeroed buffer from the pool.
    pub fn lease_zeroed(&self) -> Option<Box<[u8]>> {
        let mut buffer = self.lease()?;
        buffer.fill(0);
        Some(buffer)
    }

    /// Lease a zeroed page from the pool.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn lease_page_zeroed(self: &Arc<Self>) -> Option<Page> {
        let buffer = self.lease_zeroed()?;
        Some(Page::from_pool(buffer, Arc::clone(self)))
    }

    /// A zeroed page, pooled if possible and freshly allocated otherwise.
    #[must_use]
    pub fn page_zeroed(self: &Arc<Self>) -> Page {
        self.lease_page_zeroed()
            .unwrap_or_else(|| Page::new(self.page_size))
    }

    /// Return a buffer to the pool.
    ///
    /// # Panics
    /// Panics if the buffer has the wrong size or the pool would exceed its
    /// capacity (both indicate a bug).
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub fn return_buffer(&self, buffer: Box<[u8]>) {
        assert_eq!(
            buffer.len(),
            self.page_size,
            "Buffer pool size mismatch: returning foreign buffer"
        );
        let mut state = self.state.lock().expect("lock poisoned");
        assert!(
            state.free_list.len() < state.allocated,
            "Buffer pool overflow: returning buffer to full pool"
        );
        state.free_list.push(buffer);
    }

    /// Get the number of buffers that can be leased without falling back.
    #[must_use]
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub fn available(&self) -> usize {
        let state = self.state.lock().expect("lock poisoned");
        state.free_list.len() + (self.capacity - state.allocated)
    }

    /// Get the total capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of each buffer in bytes.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }
}
