//! Paged storage with atomic, crash-recoverable operations.
//!
//! # File Layout
//!
//! A data directory holds:
//!
//! - `files.map`: registry of data file names and their stable ids
//! - `ridbag.wal`: redo log of the atomic operation being committed
//! - one paged file per durable component (`*.grb`, `*.grs`)
//!
//! Pages are read through the [`PageCache`]; every change goes through an
//! [`AtomicOperation`] and reaches the cache only when it commits.
//!
//! # Usage
//!
//! ```ignore
//! let cache = PageCache::open(path, DEFAULT_PAGE_SIZE, 1024)?;
//! let operations = AtomicOperationsManager::open(cache, true)?;
//!
//! operations.execute_inside_atomic_operation(|op| {
//!     let file_id = op.add_file("example.grs")?;
//!     let mut page = op.add_page(file_id)?;
//!     page.set_i32(8, 0);
//!     Ok::<_, StorageError>(())
//! })?;
//! ```

mod atomic;
mod buffer_pool;
mod cache;
mod changes;
mod component;
mod error;
mod file;
mod page;
mod recovery;
mod registry;
mod wal;

pub use atomic::{
    AtomicOperation, AtomicOperationsManager, ComponentError, PageAccess, PageReadGuard,
    PageWriteGuard, ReadView,
};
pub use buffer_pool::BufferPool;
pub use cache::{FileId, INVALID_FILE_ID, PageCache};
pub use changes::PageChanges;
pub use component::{ComponentState, DurableComponent};
pub use error::StorageError;
pub use file::{FileError, PagedFile};
pub use page::{
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE, Page, PageError, PageHeader, PageIndex,
    PageRead, PageType, PageWrite,
};
pub use recovery::RecoveryResult;
pub use wal::{OperationId, WalError};
