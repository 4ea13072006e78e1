use crate::storage::{ComponentError, PageError, StorageError};

/// Errors from the size map.
///
/// Slot errors carry the slot id as seen by the caller: a local id from a
/// [`Bucket`](super::Bucket), a global id from a [`SizeMap`](super::SizeMap).
#[derive(Debug)]
pub enum SizeMapError {
    /// Page or file access failed.
    Storage(StorageError),
    /// A page was not the expected size-map page type.
    Page(PageError),
    /// The slot was deleted.
    DeletedSlot { slot: u32 },
    /// The slot's counter is already zero.
    EmptyCounter { slot: u32 },
    /// The slot was deleted before.
    AlreadyDeleted { slot: u32 },
    /// The slot was never allocated.
    UnknownSlot { slot: u32 },
    /// The slot's counter is at its maximum.
    CounterOverflow { slot: u32 },
    /// No more slot ids can be addressed.
    SlotSpaceExhausted,
    /// The size map was used before create or load.
    NotLoaded(String),
    /// Page contents are inconsistent.
    Corrupt(String),
}

impl SizeMapError {
    /// Replace the slot id carried by a slot error.
    #[must_use]
    pub fn with_slot(self, id: u32) -> Self {
        match self {
            Self::DeletedSlot { .. } => Self::DeletedSlot { slot: id },
            Self::EmptyCounter { .. } => Self::EmptyCounter { slot: id },
            Self::AlreadyDeleted { .. } => Self::AlreadyDeleted { slot: id },
            Self::UnknownSlot { .. } => Self::UnknownSlot { slot: id },
            Self::CounterOverflow { .. } => Self::CounterOverflow { slot: id },
            other => other,
        }
    }

    /// Whether the error reports a slot in a state the caller did not expect.
    #[must_use]
    pub const fn is_slot_error(&self) -> bool {
        matches!(
            self,
            Self::DeletedSlot { .. }
                | Self::EmptyCounter { .. }
                | Self::AlreadyDeleted { .. }
                | Self::UnknownSlot { .. }
                | Self::CounterOverflow { .. }
        )
    }
}

impl std::fmt::Display for SizeMapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Page(e) => write!(f, "page error: {e}"),
            Self::DeletedSlot { slot } => write!(f, "slot {slot} is deleted"),
            Self::EmptyCounter { slot } => write!(f, "slot {slot} has no items to decrement"),
            Self::AlreadyDeleted { slot } => write!(f, "slot {slot} is already deleted"),
            Self::UnknownSlot { slot } => write!(f, "slot {slot} was never allocated"),
            Self::CounterOverflow { slot } => write!(f, "slot {slot} counter overflow"),
            Self::SlotSpaceExhausted => write!(f, "no slot ids left"),
            Self::NotLoaded(name) => write!(f, "size map {name} is not loaded"),
            Self::Corrupt(msg) => write!(f, "corrupt size map: {msg}"),
        }
    }
}

impl std::error::Error for SizeMapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Page(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for SizeMapError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<PageError> for SizeMapError {
    fn from(e: PageError) -> Self {
        Self::Page(e)
    }
}

impl ComponentError for SizeMapError {
    fn with_component_context(self, component: &str, operation: &'static str) -> Self {
        match self {
            Self::Storage(e) => Self::Storage(e.in_component(component, operation)),
            other => other,
        }
    }
}
