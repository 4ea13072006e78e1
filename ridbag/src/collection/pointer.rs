use std::fmt;

use uuid::Uuid;

use crate::key::CollectionId;
use crate::storage::{FileId, INVALID_FILE_ID};

/// Persisted location of one collection.
///
/// Records keep this pointer to reach their collection after a restart: the
/// file id names the cluster's shared tree, the collection id is the key
/// prefix inside it, and the size slot addresses its counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionPointer {
    pub file_id: FileId,
    pub cluster_id: i32,
    pub collection_id: CollectionId,
    pub size_slot: u32,
}

impl CollectionPointer {
    pub const INVALID: Self = Self {
        file_id: INVALID_FILE_ID,
        cluster_id: -1,
        collection_id: -1,
        size_slot: u32::MAX,
    };

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.file_id != INVALID_FILE_ID
    }
}

impl fmt::Display for CollectionPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "collection {} in cluster {} (file {}, slot {})",
            self.collection_id, self.cluster_id, self.file_id, self.size_slot
        )
    }
}

/// A record's reference to its collection, as held by the document layer.
///
/// A collection that has not been persisted with its owner yet carries a
/// temporary id; replication uses it to match the pointer assigned here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRef {
    temporary_id: Option<Uuid>,
    pointer: Option<CollectionPointer>,
}

impl CollectionRef {
    #[must_use]
    pub const fn new(temporary_id: Option<Uuid>, pointer: Option<CollectionPointer>) -> Self {
        Self {
            temporary_id,
            pointer,
        }
    }

    /// A collection whose owner is not durable yet, with a fresh temporary id.
    #[must_use]
    pub fn transient(pointer: CollectionPointer) -> Self {
        Self::new(Some(Uuid::new_v4()), Some(pointer))
    }

    /// A collection with a durable owner.
    #[must_use]
    pub const fn durable(pointer: CollectionPointer) -> Self {
        Self::new(None, Some(pointer))
    }

    #[must_use]
    pub const fn temporary_id(&self) -> Option<Uuid> {
        self.temporary_id
    }

    #[must_use]
    pub const fn pointer(&self) -> Option<CollectionPointer> {
        self.pointer
    }
}
