//! Shared plumbing for durable components.
//!
//! A durable component (a shared tree, a size map) owns one data file named
//! `<name><extension>`. Its in-memory state sits behind a shared/exclusive
//! lock: lookups take it shared, structural mutations take it exclusive for
//! the duration of the mutation. Guards release on every exit path.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::cache::{FileId, INVALID_FILE_ID};
use crate::storage::error::StorageError;

/// In-memory state guarded by the component lock.
#[derive(Debug)]
pub struct ComponentState {
    pub file_id: FileId,
}

/// Name, file and lock of one durable component.
#[derive(Debug)]
pub struct DurableComponent {
    name: String,
    extension: &'static str,
    file_name: String,
    state: RwLock<ComponentState>,
}

impl DurableComponent {
    #[must_use]
    pub fn new(name: &str, extension: &'static str) -> Self {
        Self {
            name: name.to_string(),
            extension,
            file_name: format!("{name}{extension}"),
            state: RwLock::new(ComponentState {
                file_id: INVALID_FILE_ID,
            }),
        }
    }

    /// Component name without extension.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File extension, including the dot.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        self.extension
    }

    /// Name of the component's data file.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Take the lock shared.
    pub fn shared(&self) -> Result<RwLockReadGuard<'_, ComponentState>, StorageError> {
        self.state.read().map_err(|_| StorageError::LockPoisoned)
    }

    /// Take the lock exclusive.
    pub fn exclusive(&self) -> Result<RwLockWriteGuard<'_, ComponentState>, StorageError> {
        self.state.write().map_err(|_| StorageError::LockPoisoned)
    }

    /// Id of the component's file, or `INVALID_FILE_ID` before create/load.
    pub fn file_id(&self) -> Result<FileId, StorageError> {
        Ok(self.shared()?.file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_names() {
        let component = DurableComponent::new("global_collection_3", ".grs");
        assert_eq!(component.name(), "global_collection_3");
        assert_eq!(component.extension(), ".grs");
        assert_eq!(component.file_name(), "global_collection_3.grs");
        assert_eq!(component.file_id().expect("file id"), INVALID_FILE_ID);
    }

    #[test]
    fn test_exclusive_updates_state() {
        let component = DurableComponent::new("c", ".grb");
        component.exclusive().expect("lock").file_id = 12;
        assert_eq!(component.file_id().expect("file id"), 12);
    }
}
