//! Common helpers for end-to-end tests.

use std::path::Path;

use crate::collection::{CollectionError, CollectionTree};
use crate::config::StoreConfig;
use crate::key::RecordRef;
use crate::storage::MIN_PAGE_SIZE;
use crate::store::Store;

/// Small pages so trees and size maps span many pages quickly.
#[must_use]
pub fn test_config(dir: &Path) -> StoreConfig {
    StoreConfig::new(dir)
        .with_page_size(MIN_PAGE_SIZE)
        .with_buffer_pool_pages(256)
        .with_sync_on_commit(false)
}

#[allow(clippy::expect_used)]
#[must_use]
pub fn open_store(dir: &Path) -> Store {
    Store::open(&test_config(dir)).expect("Failed to open store")
}

/// Create a collection in its own atomic operation.
#[allow(clippy::expect_used)]
#[must_use]
pub fn create_collection(store: &Store, cluster_id: i32) -> CollectionTree {
    store
        .operations()
        .calculate_inside_atomic_operation(|op| {
            store.collections().create_and_load_tree(op, cluster_id)
        })
        .expect("Failed to create collection")
}

/// Insert every record with value 1 in one atomic operation.
#[allow(clippy::expect_used)]
pub fn put_all(store: &Store, tree: &CollectionTree, records: &[RecordRef]) {
    store
        .operations()
        .execute_inside_atomic_operation(|op| {
            for record in records {
                tree.put(op, *record, 1)?;
            }
            Ok::<_, CollectionError>(())
        })
        .expect("Failed to insert records");
}

/// Records `(cluster, 0..count)`.
#[must_use]
pub fn records(cluster: i32, count: i64) -> Vec<RecordRef> {
    (0..count).map(|p| RecordRef::new(cluster, p)).collect()
}

/// Entries of a collection as seen by a fresh read view.
#[allow(clippy::expect_used)]
#[must_use]
pub fn entries(store: &Store, tree: &CollectionTree) -> Vec<(RecordRef, i32)> {
    let view = store.operations().read_view().expect("Failed to open read view");
    tree.entries(&view).expect("Failed to scan collection")
}

/// Size slot value of a collection.
#[allow(clippy::expect_used)]
#[must_use]
pub fn size(store: &Store, tree: &CollectionTree) -> i32 {
    let view = store.operations().read_view().expect("Failed to open read view");
    tree.size(&view).expect("Failed to read size")
}
