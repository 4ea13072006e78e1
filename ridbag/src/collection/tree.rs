use std::sync::Arc;

use crate::btree::SharedTree;
use crate::collection::cluster::ClusterStorage;
use crate::collection::error::CollectionError;
use crate::collection::pointer::CollectionPointer;
use crate::key::{CollectionId, CompositeKey, RecordRef};
use crate::sizemap::SizeMap;
use crate::storage::{AtomicOperation, PageAccess};

/// Handle to one collection inside its cluster's shared tree.
///
/// Entries map a [`RecordRef`] to an `i32` (the reference count). The size
/// slot counts distinct entries.
#[derive(Debug, Clone)]
pub struct CollectionTree {
    storage: Arc<ClusterStorage>,
    pointer: CollectionPointer,
}

impl CollectionTree {
    pub(crate) const fn new(storage: Arc<ClusterStorage>, pointer: CollectionPointer) -> Self {
        Self { storage, pointer }
    }

    #[must_use]
    pub const fn pointer(&self) -> CollectionPointer {
        self.pointer
    }

    #[must_use]
    pub const fn collection_id(&self) -> CollectionId {
        self.pointer.collection_id
    }

    #[must_use]
    pub fn shared_tree(&self) -> &SharedTree {
        self.storage.tree()
    }

    #[must_use]
    pub fn size_map(&self) -> &SizeMap {
        self.storage.size_map()
    }

    /// Insert or update an entry. Returns the previous value.
    pub fn put(
        &self,
        op: &mut AtomicOperation<'_>,
        record: RecordRef,
        value: i32,
    ) -> Result<Option<i32>, CollectionError> {
        let key = self.key(record);
        let old = self.shared_tree().put(op, key, value)?;
        if old.is_none() {
            self.size_map().increment_size(op, self.pointer.size_slot)?;
        }
        Ok(old)
    }

    pub fn get(
        &self,
        access: &impl PageAccess,
        record: RecordRef,
    ) -> Result<Option<i32>, CollectionError> {
        Ok(self.shared_tree().get(access, &self.key(record))?)
    }

    /// Remove an entry. Returns the removed value.
    pub fn remove(
        &self,
        op: &mut AtomicOperation<'_>,
        record: RecordRef,
    ) -> Result<Option<i32>, CollectionError> {
        let old = self.shared_tree().remove(op, &self.key(record))?;
        if old.is_some() {
            self.size_map().decrement_size(op, self.pointer.size_slot)?;
        }
        Ok(old)
    }

    /// Number of entries, read from the size map.
    pub fn size(&self, access: &impl PageAccess) -> Result<i32, CollectionError> {
        Ok(self.size_map().get_size(access, self.pointer.size_slot)?)
    }

    /// All entries in record order.
    pub fn entries(
        &self,
        access: &impl PageAccess,
    ) -> Result<Vec<(RecordRef, i32)>, CollectionError> {
        let (low, high) = CompositeKey::collection_range(self.collection_id());
        self.shared_tree()
            .iterate_between(access, low, true, high, true)?
            .map(|entry| {
                entry
                    .map(|(key, value)| (key.record(), value))
                    .map_err(CollectionError::from)
            })
            .collect()
    }

    pub fn first_key(&self, access: &impl PageAccess) -> Result<Option<RecordRef>, CollectionError> {
        let (low, high) = CompositeKey::collection_range(self.collection_id());
        let key = self.shared_tree().first_key_between(access, low, high)?;
        Ok(key.map(|k| k.record()))
    }

    pub fn last_key(&self, access: &impl PageAccess) -> Result<Option<RecordRef>, CollectionError> {
        let (low, high) = CompositeKey::collection_range(self.collection_id());
        let key = self.shared_tree().last_key_between(access, low, high)?;
        Ok(key.map(|k| k.record()))
    }

    const fn key(&self, record: RecordRef) -> CompositeKey {
        CompositeKey::of(self.pointer.collection_id, record)
    }
}
