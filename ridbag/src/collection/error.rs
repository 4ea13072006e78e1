use crate::btree::BTreeError;
use crate::sizemap::SizeMapError;
use crate::storage::StorageError;

/// Message returned while access to the collection manager is prohibited.
const PROHIBITED_MESSAGE: &str = "access to tree-based collections is prohibited; \
     the database is probably running in a distributed configuration, \
     where collections must stay embedded";

/// Errors from the collection manager and collection handles.
#[derive(Debug)]
pub enum CollectionError {
    /// The manager was switched to prohibited mode.
    AccessProhibited,
    /// Storage for a cluster already exists.
    AlreadyExists(String),
    /// A pointer or slot refers to state that does not exist.
    CorruptState(String),
    /// Page or file access failed.
    Storage(StorageError),
    /// Shared tree operation failed.
    Tree(BTreeError),
    /// Size map operation failed.
    SizeMap(SizeMapError),
    /// A manager lock was poisoned by a panicking thread.
    LockPoisoned,
}

impl CollectionError {
    /// Whether the error points at a logic bug or on-disk corruption.
    #[must_use]
    pub const fn is_corrupt_state(&self) -> bool {
        match self {
            Self::CorruptState(_) => true,
            Self::SizeMap(e) => e.is_slot_error(),
            _ => false,
        }
    }
}

impl std::fmt::Display for CollectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccessProhibited => write!(f, "{PROHIBITED_MESSAGE}"),
            Self::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
            Self::CorruptState(msg) => write!(f, "corrupt state: {msg}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Tree(e) => write!(f, "tree error: {e}"),
            Self::SizeMap(e) => write!(f, "size map error: {e}"),
            Self::LockPoisoned => write!(f, "collection manager lock poisoned"),
        }
    }
}

impl std::error::Error for CollectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Tree(e) => Some(e),
            Self::SizeMap(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for CollectionError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<BTreeError> for CollectionError {
    fn from(e: BTreeError) -> Self {
        Self::Tree(e)
    }
}

impl From<SizeMapError> for CollectionError {
    fn from(e: SizeMapError) -> Self {
        Self::SizeMap(e)
    }
}
