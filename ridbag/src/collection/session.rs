use std::collections::HashMap;

use uuid::Uuid;

use crate::collection::pointer::CollectionPointer;

/// Per-session state the collection manager writes to.
///
/// Holds the pending-pointer change set: temporary collection ids mapped to
/// the pointers assigned to them during this session. Cleared on commit.
#[derive(Debug, Default)]
pub struct Session {
    collection_changes: HashMap<Uuid, CollectionPointer>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_collection_change(&mut self, owner: Uuid, pointer: CollectionPointer) {
        self.collection_changes.insert(owner, pointer);
    }

    /// Pointers assigned to transient collections in this session.
    #[must_use]
    pub const fn collection_changes(&self) -> &HashMap<Uuid, CollectionPointer> {
        &self.collection_changes
    }

    pub fn clear_collection_changes(&mut self) {
        self.collection_changes.clear();
    }

    /// End the session's transaction; pending pointers are no longer needed.
    pub fn commit(&mut self) {
        self.clear_collection_changes();
    }
}
