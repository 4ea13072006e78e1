//! Test that failed atomic operations leave storage and the manager untouched.

use crate::collection::{CollectionError, CollectionPointer};
use crate::e2e_tests::helpers::*;
use crate::key::RecordRef;
use tempfile::tempdir;

#[test]
fn test_failed_operation_changes_nothing() {
    let dir = tempdir().expect("failed to create temp dir");
    let store = open_store(dir.path());
    let existing = create_collection(&store, 1);
    put_all(&store, &existing, &records(1, 50));

    let mut created: Option<CollectionPointer> = None;
    let result = store
        .operations()
        .execute_inside_atomic_operation(|op| {
            let fresh = store.collections().create_and_load_tree(op, 2)?;
            created = Some(fresh.pointer());
            for record in records(2, 200) {
                fresh.put(op, record, 1)?;
            }
            for record in records(1, 25) {
                existing.remove(op, record)?;
            }
            existing.put(op, RecordRef::new(1, 1000), 1)?;
            Err(CollectionError::CorruptState("forced failure".to_string()))
        });
    assert!(matches!(result, Err(CollectionError::CorruptState(_))));

    assert_eq!(entries(&store, &existing).len(), 50);
    assert_eq!(size(&store, &existing), 50);

    // The new cluster was never created
    assert!(store.collections().cluster_storage(2).expect("lookup").is_none());
    let cache = store.operations().cache();
    assert!(!cache.file_exists("global_collection_2.grb").expect("exists"));
    assert!(!cache.file_exists("global_collection_2.grs").expect("exists"));
    let pointer = created.expect("pointer assigned before failure");
    assert!(store.collections().load_sb_tree(pointer).is_err());

    // And can be created now
    let tree = create_collection(&store, 2);
    put_all(&store, &tree, &records(2, 10));
    assert_eq!(size(&store, &tree), 10);
}

#[test]
fn test_failed_delete_keeps_collection() {
    let dir = tempdir().expect("failed to create temp dir");
    let store = open_store(dir.path());
    let tree = create_collection(&store, 1);
    put_all(&store, &tree, &records(1, 400));

    let result = store.operations().execute_inside_atomic_operation(|op| {
        store.collections().delete(op, tree.pointer())?;
        Err(CollectionError::CorruptState("forced failure".to_string()))
    });
    assert!(result.is_err());

    assert_eq!(entries(&store, &tree).len(), 400);
    assert_eq!(size(&store, &tree), 400);
}
