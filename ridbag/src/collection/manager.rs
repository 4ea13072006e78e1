//! Allocates collections and owns the per-cluster shared trees.
//!
//! # Pre-conditions
//!
//! - Every mutating call runs inside an atomic operation supplied by the
//!   caller; the manager never starts one itself
//!
//! # Invariants
//!
//! - At most one [`ClusterStorage`] is registered per cluster
//! - Collection ids are always >= 1 and never handed out twice by one manager
//! - Once access is prohibited it stays prohibited
//!
//! Registrations made inside an atomic operation are undone if it rolls
//! back, so the in-memory maps never point at files that were not created.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collection::cluster::{ClusterStorage, parse_tree_file_name};
use crate::collection::error::CollectionError;
use crate::collection::pointer::{CollectionPointer, CollectionRef};
use crate::collection::session::Session;
use crate::collection::tree::CollectionTree;
use crate::key::{CollectionId, CompositeKey};
use crate::storage::{AtomicOperation, AtomicOperationsManager, FileId};

/// Entries removed per tree scan when deleting a collection.
const DELETE_BATCH_SIZE: usize = 256;

type StorageMap = Arc<RwLock<HashMap<FileId, Arc<ClusterStorage>>>>;
type ClusterMap = Arc<RwLock<HashMap<i32, FileId>>>;

/// Creates, loads and deletes collections stored in shared trees.
pub struct CollectionManager {
    operations: Arc<AtomicOperationsManager>,
    prohibited: AtomicBool,
    /// Registered storages by tree file id.
    storages: StorageMap,
    /// Tree file id by cluster id. Locked before `storages`.
    clusters: ClusterMap,
    id_counter: AtomicI64,
}

impl CollectionManager {
    #[must_use]
    pub fn new(operations: Arc<AtomicOperationsManager>) -> Self {
        Self {
            operations,
            prohibited: AtomicBool::new(false),
            storages: Arc::new(RwLock::new(HashMap::new())),
            clusters: Arc::new(RwLock::new(HashMap::new())),
            id_counter: AtomicI64::new(0),
        }
    }

    /// The operations manager the collections are stored through.
    #[must_use]
    pub const fn operations(&self) -> &Arc<AtomicOperationsManager> {
        &self.operations
    }

    /// Switch to prohibited mode. Irreversible.
    pub fn prohibit_access(&self) {
        if !self.prohibited.swap(true, Ordering::SeqCst) {
            warn!("Access to tree-based collections is now prohibited");
        }
    }

    #[must_use]
    pub fn is_access_prohibited(&self) -> bool {
        self.prohibited.load(Ordering::SeqCst)
    }

    fn check_access(&self) -> Result<(), CollectionError> {
        if self.is_access_prohibited() {
            return Err(CollectionError::AccessProhibited);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Cluster storage
    // ---------------------------------------------------------------------

    /// Registered storage of a cluster.
    pub fn cluster_storage(
        &self,
        cluster_id: i32,
    ) -> Result<Option<Arc<ClusterStorage>>, CollectionError> {
        let clusters = self
            .clusters
            .read()
            .map_err(|_| CollectionError::LockPoisoned)?;
        let Some(file_id) = clusters.get(&cluster_id) else {
            return Ok(None);
        };
        let storages = self
            .storages
            .read()
            .map_err(|_| CollectionError::LockPoisoned)?;
        Ok(storages.get(file_id).cloned())
    }

    /// Ids of all registered clusters, ascending.
    pub fn cluster_ids(&self) -> Result<Vec<i32>, CollectionError> {
        let clusters = self
            .clusters
            .read()
            .map_err(|_| CollectionError::LockPoisoned)?;
        let mut ids: Vec<i32> = clusters.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Create the tree and size map files of a cluster.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn create_cluster_storage(
        &self,
        op: &mut AtomicOperation<'_>,
        cluster_id: i32,
    ) -> Result<Arc<ClusterStorage>, CollectionError> {
        self.check_access()?;
        if self.cluster_storage(cluster_id)?.is_some() {
            return Err(already_exists(cluster_id));
        }

        let storage = Arc::new(ClusterStorage::new(cluster_id));
        if op.file_exists(storage.tree().file_name())? {
            return Err(already_exists(cluster_id));
        }
        storage.tree().create(op)?;
        storage.size_map().create(op)?;

        let file_id = storage.tree().file_id()?;
        let registered = self.register(cluster_id, file_id, &storage)?;

        let storages = Arc::clone(&self.storages);
        let clusters = Arc::clone(&self.clusters);
        op.on_rollback(move || {
            if let (Ok(mut clusters), Ok(mut storages)) = (clusters.write(), storages.write()) {
                clusters.remove(&cluster_id);
                storages.remove(&file_id);
            }
        });

        info!(cluster_id, file_id, "Created cluster storage");
        Ok(registered)
    }

    /// Open the existing files of a cluster. Returns `None` if there are none.
    pub fn load_cluster_storage(
        &self,
        cluster_id: i32,
    ) -> Result<Option<Arc<ClusterStorage>>, CollectionError> {
        self.check_access()?;
        if let Some(storage) = self.cluster_storage(cluster_id)? {
            return Ok(Some(storage));
        }

        let cache = self.operations.cache();
        let storage = Arc::new(ClusterStorage::new(cluster_id));
        if !storage.tree().load(cache)? {
            return Ok(None);
        }
        if !storage.size_map().load(cache)? {
            return Err(CollectionError::CorruptState(format!(
                "cluster {cluster_id} has a tree but no size map"
            )));
        }

        let file_id = storage.tree().file_id()?;
        let registered = self.register(cluster_id, file_id, &storage)?;
        debug!(cluster_id, file_id, "Loaded cluster storage");
        Ok(Some(registered))
    }

    /// Load the storage of every cluster that has a tree file.
    ///
    /// Also advances the id counter past the largest collection id found, so
    /// a restarted manager does not hand out ids that hold entries.
    pub fn load_existing_clusters(&self) -> Result<Vec<i32>, CollectionError> {
        self.check_access()?;
        let mut loaded = Vec::new();
        for (_, name) in self.operations.cache().file_names()? {
            if let Some(cluster_id) = parse_tree_file_name(&name)
                && self.load_cluster_storage(cluster_id)?.is_some()
            {
                loaded.push(cluster_id);
            }
        }
        loaded.sort_unstable();

        let view = self.operations.read_view()?;
        for &cluster_id in &loaded {
            let Some(storage) = self.cluster_storage(cluster_id)? else {
                continue;
            };
            if let Some(last) = storage.tree().last_key(&view)? {
                self.id_counter
                    .fetch_max(last.collection_id, Ordering::SeqCst);
            }
        }

        info!(clusters = loaded.len(), "Loaded existing cluster storages");
        Ok(loaded)
    }

    /// Delete the files of a cluster when the operation commits.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn drop_cluster_storage(
        &self,
        op: &mut AtomicOperation<'_>,
        cluster_id: i32,
    ) -> Result<(), CollectionError> {
        self.check_access()?;
        let Some(storage) = self.cluster_storage(cluster_id)? else {
            return Err(CollectionError::CorruptState(format!(
                "cluster {cluster_id} has no collection storage"
            )));
        };

        storage.tree().delete(op)?;
        storage.size_map().delete(op)?;
        let file_id = storage.tree().file_id()?;
        self.unregister(cluster_id, file_id)?;

        let storages = Arc::clone(&self.storages);
        let clusters = Arc::clone(&self.clusters);
        op.on_rollback(move || {
            if let (Ok(mut clusters), Ok(mut storages)) = (clusters.write(), storages.write()) {
                clusters.insert(cluster_id, file_id);
                storages.insert(file_id, storage);
            }
        });

        info!(cluster_id, file_id, "Dropped cluster storage");
        Ok(())
    }

    /// Register a storage unless another one was registered first, and
    /// return whichever is registered.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    fn register(
        &self,
        cluster_id: i32,
        file_id: FileId,
        storage: &Arc<ClusterStorage>,
    ) -> Result<Arc<ClusterStorage>, CollectionError> {
        let mut clusters = self
            .clusters
            .write()
            .map_err(|_| CollectionError::LockPoisoned)?;
        let mut storages = self
            .storages
            .write()
            .map_err(|_| CollectionError::LockPoisoned)?;

        if let Some(existing) = clusters.get(&cluster_id).and_then(|id| storages.get(id)) {
            return Ok(Arc::clone(existing));
        }
        clusters.insert(cluster_id, file_id);
        storages.insert(file_id, Arc::clone(storage));
        Ok(Arc::clone(storage))
    }

    fn unregister(&self, cluster_id: i32, file_id: FileId) -> Result<(), CollectionError> {
        let mut clusters = self
            .clusters
            .write()
            .map_err(|_| CollectionError::LockPoisoned)?;
        let mut storages = self
            .storages
            .write()
            .map_err(|_| CollectionError::LockPoisoned)?;
        clusters.remove(&cluster_id);
        storages.remove(&file_id);
        Ok(())
    }

    /// Registered storage of a cluster, loading or creating it if needed.
    fn cluster_storage_or_create(
        &self,
        op: &mut AtomicOperation<'_>,
        cluster_id: i32,
    ) -> Result<Arc<ClusterStorage>, CollectionError> {
        if let Some(storage) = self.cluster_storage(cluster_id)? {
            return Ok(storage);
        }
        // Files this operation deleted count as absent. `op` holds the writer
        // lock, so no other operation can create them before the create below.
        let tree_file = ClusterStorage::new(cluster_id).tree().file_name().to_string();
        if op.file_exists(&tree_file)?
            && let Some(storage) = self.load_cluster_storage(cluster_id)?
        {
            return Ok(storage);
        }
        self.create_cluster_storage(op, cluster_id)
    }

    // ---------------------------------------------------------------------
    // Collections
    // ---------------------------------------------------------------------

    /// Create a collection in a cluster's shared tree.
    pub fn create_and_load_tree(
        &self,
        op: &mut AtomicOperation<'_>,
        cluster_id: i32,
    ) -> Result<CollectionTree, CollectionError> {
        self.check_access()?;
        let storage = self.cluster_storage_or_create(op, cluster_id)?;
        let collection_id = self.allocate_collection_id(op, &storage)?;
        let size_slot = storage.size_map().add_tree(op)?;

        let pointer = CollectionPointer {
            file_id: storage.tree().file_id()?,
            cluster_id,
            collection_id,
            size_slot,
        };
        debug!(%pointer, "Created collection");
        Ok(CollectionTree::new(storage, pointer))
    }

    /// Create a collection and return its pointer.
    ///
    /// With an `owner`, the pointer is also recorded in the session's change
    /// set under that temporary id.
    pub fn create_sb_tree(
        &self,
        op: &mut AtomicOperation<'_>,
        session: &mut Session,
        cluster_id: i32,
        owner: Option<Uuid>,
    ) -> Result<CollectionPointer, CollectionError> {
        let pointer = self.create_and_load_tree(op, cluster_id)?.pointer();
        if let Some(owner) = owner
            && pointer.is_valid()
        {
            session.record_collection_change(owner, pointer);
        }
        Ok(pointer)
    }

    /// Handle of a previously created collection.
    pub fn load_sb_tree(
        &self,
        pointer: CollectionPointer,
    ) -> Result<CollectionTree, CollectionError> {
        self.check_access()?;
        let storage = self.storage_for(pointer)?;
        Ok(CollectionTree::new(storage, pointer))
    }

    /// Remove every entry of a collection and retire its size slot.
    pub fn delete(
        &self,
        op: &mut AtomicOperation<'_>,
        pointer: CollectionPointer,
    ) -> Result<bool, CollectionError> {
        self.check_access()?;
        let storage = self.storage_for(pointer)?;
        let tree = storage.tree();

        let (low, high) = CompositeKey::collection_range(pointer.collection_id);
        let mut from = low;
        let mut from_inclusive = true;
        let mut removed = 0usize;
        loop {
            let batch = tree
                .iterate_between(&*op, from, from_inclusive, high, true)?
                .take(DELETE_BATCH_SIZE)
                .map(|entry| entry.map(|(key, _)| key))
                .collect::<Result<Vec<_>, _>>()?;
            let Some(&last) = batch.last() else {
                break;
            };

            for key in &batch {
                tree.remove(op, key)?;
            }
            removed += batch.len();
            from = last;
            from_inclusive = false;
        }

        storage.size_map().remove(op, pointer.size_slot)?;
        info!(%pointer, removed, "Deleted collection");
        Ok(true)
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    fn storage_for(
        &self,
        pointer: CollectionPointer,
    ) -> Result<Arc<ClusterStorage>, CollectionError> {
        let storages = self
            .storages
            .read()
            .map_err(|_| CollectionError::LockPoisoned)?;
        match storages.get(&pointer.file_id) {
            Some(storage) if storage.cluster_id() == pointer.cluster_id => Ok(Arc::clone(storage)),
            _ => Err(CollectionError::CorruptState(format!(
                "no shared tree for {pointer}"
            ))),
        }
    }

    /// Next unused collection id.
    ///
    /// The counter is shared by all clusters. Ids already present in the tree
    /// (a counter reset, an import) are skipped.
    ///
    /// When the counter passes `i64::MAX` it is reset to 0, so ids run again
    /// from 1. From then on only the range probe against this cluster's tree
    /// keeps a new collection from landing on a live one.
    fn allocate_collection_id(
        &self,
        op: &AtomicOperation<'_>,
        storage: &ClusterStorage,
    ) -> Result<CollectionId, CollectionError> {
        loop {
            let candidate = self
                .id_counter
                .fetch_add(1, Ordering::SeqCst)
                .wrapping_add(1);
            if candidate <= 0 {
                // Wrapped around; start over from the bottom
                let _ = self.id_counter.compare_exchange(
                    candidate,
                    0,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                continue;
            }

            let (low, high) = CompositeKey::collection_range(candidate);
            if !storage.tree().has_entries_between(op, low, high)? {
                return Ok(candidate);
            }
            debug!(collection_id = candidate, "Collection id in use, skipping");
        }
    }

    // ---------------------------------------------------------------------
    // Change tracking
    // ---------------------------------------------------------------------

    /// Record a transient collection's pointer in the session.
    ///
    /// Always returns `None`: the caller drops its temporary id, which is not
    /// needed once the pointer is tracked.
    #[allow(clippy::unused_self)]
    pub fn listen_for_changes(
        &self,
        session: &mut Session,
        collection: &CollectionRef,
    ) -> Option<Uuid> {
        if let (Some(owner), Some(pointer)) = (collection.temporary_id(), collection.pointer())
            && pointer.is_valid()
        {
            session.record_collection_change(owner, pointer);
        }
        None
    }

    /// Pointers assigned to transient collections in this session.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn changed_ids<'s>(&self, session: &'s Session) -> &'s HashMap<Uuid, CollectionPointer> {
        session.collection_changes()
    }

    #[allow(clippy::unused_self)]
    pub fn clear_changed_ids(&self, session: &mut Session) {
        session.clear_collection_changes();
    }

    /// Forget all registered storages. Files are untouched.
    pub fn close(&self) -> Result<(), CollectionError> {
        let mut clusters = self
            .clusters
            .write()
            .map_err(|_| CollectionError::LockPoisoned)?;
        let mut storages = self
            .storages
            .write()
            .map_err(|_| CollectionError::LockPoisoned)?;
        clusters.clear();
        storages.clear();
        debug!("Closed collection manager");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_id_counter(&self, value: i64) {
        self.id_counter.store(value, Ordering::SeqCst);
    }
}

fn already_exists(cluster_id: i32) -> CollectionError {
    CollectionError::AlreadyExists(format!(
        "collection storage for cluster {cluster_id}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::RecordRef;
    use crate::storage::{MIN_PAGE_SIZE, PageCache};
    use std::path::Path;
    use tempfile::tempdir;

    fn open(dir: &Path) -> CollectionManager {
        let cache = PageCache::open(dir, MIN_PAGE_SIZE, 256).expect("open cache");
        let operations = AtomicOperationsManager::open(cache, false).expect("open manager");
        CollectionManager::new(operations)
    }

    fn create(manager: &CollectionManager, cluster_id: i32) -> CollectionTree {
        manager
            .operations()
            .calculate_inside_atomic_operation(|op| manager.create_and_load_tree(op, cluster_id))
            .expect("create collection")
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let dir = tempdir().expect("failed to create temp dir");
        let manager = open(dir.path());

        let a = create(&manager, 1);
        let b = create(&manager, 1);
        let c = create(&manager, 2);
        assert_eq!(a.collection_id(), 1);
        assert_eq!(b.collection_id(), 2);
        assert_eq!(c.collection_id(), 3);
        assert_ne!(a.pointer().size_slot, b.pointer().size_slot);
        assert_ne!(a.pointer().file_id, c.pointer().file_id);
        assert_eq!(manager.cluster_ids().expect("clusters"), vec![1, 2]);
    }

    #[test]
    fn test_negative_counter_restarts_from_one() {
        let dir = tempdir().expect("failed to create temp dir");
        let manager = open(dir.path());

        manager.set_id_counter(i64::MAX);
        let tree = create(&manager, 1);
        assert_eq!(tree.collection_id(), 1);
    }

    #[test]
    fn test_allocation_skips_ids_with_entries() {
        let dir = tempdir().expect("failed to create temp dir");
        let manager = open(dir.path());
        let first = create(&manager, 1);
        assert_eq!(first.collection_id(), 1);

        // Entries for ids 2 and 3 appear without going through the counter
        let tree = first.shared_tree();
        manager
            .operations()
            .execute_inside_atomic_operation(|op| {
                tree.put(op, CompositeKey::new(2, 0, 0), 1)?;
                tree.put(op, CompositeKey::new(3, 5, 9), 1)?;
                Ok::<_, CollectionError>(())
            })
            .expect("put");

        assert_eq!(create(&manager, 1).collection_id(), 4);
    }

    #[test]
    fn test_concurrent_allocation_yields_unique_ids() {
        const THREADS: usize = 4;
        const OPERATIONS: usize = 25;
        const PER_OPERATION: usize = 20;

        let dir = tempdir().expect("failed to create temp dir");
        let manager = open(dir.path());
        let first = create(&manager, 1);

        // Ids 5..=9 already hold entries
        let tree = first.shared_tree();
        manager
            .operations()
            .execute_inside_atomic_operation(|op| {
                for id in 5..10 {
                    tree.put(op, CompositeKey::new(id, 0, 0), 1)?;
                }
                Ok::<_, CollectionError>(())
            })
            .expect("put");

        let ids: Vec<CollectionId> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        let mut ids = Vec::new();
                        for _ in 0..OPERATIONS {
                            let batch = manager
                                .operations()
                                .calculate_inside_atomic_operation(|op| {
                                    (0..PER_OPERATION)
                                        .map(|_| {
                                            manager
                                                .create_and_load_tree(op, 1)
                                                .map(|tree| tree.collection_id())
                                        })
                                        .collect::<Result<Vec<_>, _>>()
                                })
                                .expect("create batch");
                            ids.extend(batch);
                        }
                        ids
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().expect("thread panicked"))
                .collect()
        });

        assert_eq!(ids.len(), THREADS * OPERATIONS * PER_OPERATION);
        let unique: std::collections::HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids.iter().all(|&id| id > 1 && !(5..10).contains(&id)));
    }

    #[test]
    fn test_create_cluster_storage_twice_fails() {
        let dir = tempdir().expect("failed to create temp dir");
        let manager = open(dir.path());
        let operations = manager.operations();

        operations
            .execute_inside_atomic_operation(|op| {
                manager.create_cluster_storage(op, 5).map(|_| ())
            })
            .expect("create");
        let result = operations.execute_inside_atomic_operation(|op| {
            manager.create_cluster_storage(op, 5).map(|_| ())
        });
        assert!(matches!(result, Err(CollectionError::AlreadyExists(_))));

        // Files on disk count too, even when nothing is registered
        manager.close().expect("close");
        let result = operations.execute_inside_atomic_operation(|op| {
            manager.create_cluster_storage(op, 5).map(|_| ())
        });
        assert!(matches!(result, Err(CollectionError::AlreadyExists(_))));
    }

    #[test]
    fn test_rollback_unregisters_cluster_storage() {
        let dir = tempdir().expect("failed to create temp dir");
        let manager = open(dir.path());

        let result = manager
            .operations()
            .execute_inside_atomic_operation(|op| {
                manager.create_and_load_tree(op, 8)?;
                Err(CollectionError::CorruptState("forced".to_string()))
            });
        assert!(result.is_err());
        assert!(manager.cluster_storage(8).expect("lookup").is_none());
        assert!(
            !manager
                .operations()
                .cache()
                .file_exists("global_collection_8.grb")
                .expect("exists")
        );

        // The cluster can still be created afterwards
        create(&manager, 8);
        assert!(manager.cluster_storage(8).expect("lookup").is_some());
    }

    #[test]
    fn test_put_remove_track_size() {
        let dir = tempdir().expect("failed to create temp dir");
        let manager = open(dir.path());
        let tree = create(&manager, 1);
        let operations = manager.operations();

        operations
            .execute_inside_atomic_operation(|op| {
                for p in 0..20 {
                    tree.put(op, RecordRef::new(3, p), 1)?;
                }
                // Updating an existing entry does not change the size
                tree.put(op, RecordRef::new(3, 0), 2)?;
                tree.remove(op, RecordRef::new(3, 19))?;
                tree.remove(op, RecordRef::new(3, 19))?;
                Ok::<_, CollectionError>(())
            })
            .expect("mutate");

        let view = operations.read_view().expect("view");
        assert_eq!(tree.size(&view).expect("size"), 19);
        assert_eq!(tree.get(&view, RecordRef::new(3, 0)).expect("get"), Some(2));
        assert_eq!(tree.first_key(&view).expect("first"), Some(RecordRef::new(3, 0)));
        assert_eq!(tree.last_key(&view).expect("last"), Some(RecordRef::new(3, 18)));
        assert_eq!(tree.entries(&view).expect("entries").len(), 19);
    }

    #[test]
    fn test_load_sb_tree() {
        let dir = tempdir().expect("failed to create temp dir");
        let manager = open(dir.path());
        let tree = create(&manager, 1);

        let loaded = manager.load_sb_tree(tree.pointer()).expect("load");
        assert_eq!(loaded.pointer(), tree.pointer());

        let missing = CollectionPointer {
            file_id: 999,
            ..tree.pointer()
        };
        let err = manager.load_sb_tree(missing).expect_err("should fail");
        assert!(err.is_corrupt_state());
    }

    #[test]
    fn test_delete_removes_only_that_collection() {
        let dir = tempdir().expect("failed to create temp dir");
        let manager = open(dir.path());
        let operations = manager.operations();
        let doomed = create(&manager, 1);
        let kept = create(&manager, 1);

        operations
            .execute_inside_atomic_operation(|op| {
                for p in 0..600 {
                    doomed.put(op, RecordRef::new(1, p), 1)?;
                    kept.put(op, RecordRef::new(1, p), 1)?;
                }
                Ok::<_, CollectionError>(())
            })
            .expect("put");

        let deleted = operations
            .calculate_inside_atomic_operation(|op| manager.delete(op, doomed.pointer()))
            .expect("delete");
        assert!(deleted);

        let view = operations.read_view().expect("view");
        assert!(doomed.entries(&view).expect("entries").is_empty());
        assert!(matches!(
            doomed.size(&view),
            Err(CollectionError::SizeMap(crate::sizemap::SizeMapError::DeletedSlot { .. }))
        ));
        assert_eq!(kept.entries(&view).expect("entries").len(), 600);
        assert_eq!(kept.size(&view).expect("size"), 600);
    }

    #[test]
    fn test_prohibit_access_is_one_way() {
        let dir = tempdir().expect("failed to create temp dir");
        let manager = open(dir.path());
        let tree = create(&manager, 1);

        manager.prohibit_access();
        manager.prohibit_access();
        assert!(manager.is_access_prohibited());

        let operations = manager.operations();
        let result = operations
            .calculate_inside_atomic_operation(|op| manager.create_and_load_tree(op, 1));
        assert!(matches!(result, Err(CollectionError::AccessProhibited)));
        assert!(matches!(
            manager.load_sb_tree(tree.pointer()),
            Err(CollectionError::AccessProhibited)
        ));
        let result = operations
            .calculate_inside_atomic_operation(|op| manager.delete(op, tree.pointer()));
        assert!(matches!(result, Err(CollectionError::AccessProhibited)));
        assert!(matches!(
            manager.load_cluster_storage(1),
            Err(CollectionError::AccessProhibited)
        ));
    }

    #[test]
    fn test_change_tracking() {
        let dir = tempdir().expect("failed to create temp dir");
        let manager = open(dir.path());
        let mut session = Session::new();
        let owner = Uuid::new_v4();

        let pointer = manager
            .operations()
            .calculate_inside_atomic_operation(|op| {
                manager.create_sb_tree(op, &mut session, 1, Some(owner))
            })
            .expect("create");
        assert_eq!(manager.changed_ids(&session).get(&owner), Some(&pointer));

        // Without an owner nothing is recorded
        manager
            .operations()
            .calculate_inside_atomic_operation(|op| manager.create_sb_tree(op, &mut session, 1, None))
            .expect("create");
        assert_eq!(manager.changed_ids(&session).len(), 1);

        let transient = CollectionRef::transient(pointer);
        assert_eq!(manager.listen_for_changes(&mut session, &transient), None);
        assert_eq!(manager.changed_ids(&session).len(), 2);

        // Durable or invalid collections are not tracked
        manager.listen_for_changes(&mut session, &CollectionRef::durable(pointer));
        manager.listen_for_changes(
            &mut session,
            &CollectionRef::transient(CollectionPointer::INVALID),
        );
        assert_eq!(manager.changed_ids(&session).len(), 2);

        manager.clear_changed_ids(&mut session);
        assert!(manager.changed_ids(&session).is_empty());

        manager.listen_for_changes(&mut session, &transient);
        session.commit();
        assert!(session.collection_changes().is_empty());
    }

    #[test]
    fn test_close_forgets_storages_and_reload_restores_them() {
        let dir = tempdir().expect("failed to create temp dir");
        let manager = open(dir.path());
        let tree = create(&manager, 4);
        create(&manager, 6);
        manager
            .operations()
            .execute_inside_atomic_operation(|op| tree.put(op, RecordRef::new(0, 1), 1).map(|_| ()))
            .expect("put");

        manager.close().expect("close");
        assert!(manager.cluster_ids().expect("clusters").is_empty());
        assert!(manager.load_sb_tree(tree.pointer()).is_err());

        assert_eq!(manager.load_existing_clusters().expect("load"), vec![4, 6]);
        let loaded = manager.load_sb_tree(tree.pointer()).expect("load");
        let view = manager.operations().read_view().expect("view");
        assert_eq!(loaded.size(&view).expect("size"), 1);
        drop(view);

        // The counter moved past the ids with entries
        assert!(create(&manager, 4).collection_id() > tree.collection_id());
    }

    #[test]
    fn test_drop_cluster_storage() {
        let dir = tempdir().expect("failed to create temp dir");
        let manager = open(dir.path());
        create(&manager, 3);
        let operations = manager.operations();

        let result = operations.execute_inside_atomic_operation(|op| {
            manager.drop_cluster_storage(op, 3)?;
            Err(CollectionError::CorruptState("forced".to_string()))
        });
        assert!(result.is_err());
        assert!(manager.cluster_storage(3).expect("lookup").is_some());

        operations
            .execute_inside_atomic_operation(|op| manager.drop_cluster_storage(op, 3))
            .expect("drop");
        assert!(manager.cluster_storage(3).expect("lookup").is_none());
        let cache = operations.cache();
        assert!(!cache.file_exists("global_collection_3.grb").expect("exists"));
        assert!(!cache.file_exists("global_collection_3.grs").expect("exists"));
    }

    #[test]
    fn test_drop_and_recreate_cluster_storage_in_one_operation() {
        let dir = tempdir().expect("failed to create temp dir");
        let manager = open(dir.path());
        let old = create(&manager, 3);
        let operations = manager.operations();
        operations
            .execute_inside_atomic_operation(|op| {
                old.put(op, RecordRef::new(3, 1), 1)?;
                Ok::<_, CollectionError>(())
            })
            .expect("put");

        // Rolled back: the old storage and its entry are still there
        let result = operations.execute_inside_atomic_operation(|op| {
            manager.drop_cluster_storage(op, 3)?;
            manager.create_and_load_tree(op, 3)?;
            Err(CollectionError::CorruptState("forced".to_string()))
        });
        assert!(result.is_err());
        let storage = manager.cluster_storage(3).expect("lookup").expect("registered");
        assert_eq!(storage.tree().file_id().expect("file id"), old.pointer().file_id);

        let tree = operations
            .calculate_inside_atomic_operation(|op| {
                manager.drop_cluster_storage(op, 3)?;
                let tree = manager.create_and_load_tree(op, 3)?;
                tree.put(op, RecordRef::new(3, 2), 2)?;
                Ok::<_, CollectionError>(tree)
            })
            .expect("drop and recreate");

        assert_ne!(tree.pointer().file_id, old.pointer().file_id);
        let storage = manager.cluster_storage(3).expect("lookup").expect("registered");
        assert_eq!(storage.tree().file_id().expect("file id"), tree.pointer().file_id);

        let view = operations.read_view().expect("view");
        assert_eq!(tree.size(&view).expect("size"), 1);
        assert_eq!(tree.get(&view, RecordRef::new(3, 2)).expect("get"), Some(2));
        // The old entry went with the old file
        assert_eq!(storage.tree().entry_count(&view).expect("count"), 1);
    }
}
