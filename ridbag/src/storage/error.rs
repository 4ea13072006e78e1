//! Storage-layer error type.

use crate::storage::cache::FileId;
use crate::storage::page::{PageError, PageIndex};
use crate::storage::wal::WalError;

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// A page failed header or checksum validation.
    Page(PageError),
    /// Page out of bounds.
    PageOutOfBounds {
        file_id: FileId,
        page_index: PageIndex,
        page_count: u64,
    },
    /// No open file has this id.
    UnknownFile(FileId),
    /// No file with this name exists.
    FileNotFound(String),
    /// A file with this name already exists.
    FileExists(String),
    /// WAL error.
    Wal(WalError),
    /// Corruption detected.
    Corruption(String),
    /// A lock was poisoned by a panicking thread.
    LockPoisoned,
    /// A committed operation could not be applied. The store must be
    /// reopened so recovery can finish it from the WAL.
    RecoveryRequired,
    /// Failure inside a durable component, with the component and operation
    /// that were running.
    Component {
        component: String,
        operation: &'static str,
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// Attach component context, unless the error already carries some.
    #[must_use]
    pub fn in_component(self, component: &str, operation: &'static str) -> Self {
        match self {
            Self::Component { .. } => self,
            other => Self::Component {
                component: component.to_string(),
                operation,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with component context stripped.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Component { source, .. } => source.root(),
            other => other,
        }
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Page(e) => write!(f, "page error: {e}"),
            Self::PageOutOfBounds {
                file_id,
                page_index,
                page_count,
            } => write!(
                f,
                "page {page_index} of file {file_id} out of bounds (total pages: {page_count})"
            ),
            Self::UnknownFile(id) => write!(f, "unknown file id: {id}"),
            Self::FileNotFound(name) => write!(f, "file not found: {name}"),
            Self::FileExists(name) => write!(f, "file already exists: {name}"),
            Self::Wal(e) => write!(f, "WAL error: {e}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::LockPoisoned => write!(f, "lock poisoned"),
            Self::RecoveryRequired => {
                write!(f, "a committed operation was not applied; reopen to recover")
            }
            Self::Component {
                component,
                operation,
                source,
            } => write!(f, "{component}: {operation} failed: {source}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Page(e) => Some(e),
            Self::Wal(e) => Some(e),
            Self::Component { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<PageError> for StorageError {
    fn from(e: PageError) -> Self {
        Self::Page(e)
    }
}

impl From<WalError> for StorageError {
    fn from(e: WalError) -> Self {
        Self::Wal(e)
    }
}
