//! Test creating, filling, counting and deleting one collection.

use crate::collection::{CollectionError, Session};
use crate::e2e_tests::helpers::*;
use crate::key::{CompositeKey, RecordRef};
use crate::sizemap::SizeMapError;
use tempfile::tempdir;

#[test]
fn test_create_fill_count_delete() {
    let dir = tempdir().expect("failed to create temp dir");
    let store = open_store(dir.path());
    let collections = store.collections();
    let operations = store.operations();
    let cluster_id = 42;

    // The next allocated id is 7
    collections.set_id_counter(6);
    let mut session = Session::new();
    let pointer = operations
        .calculate_inside_atomic_operation(|op| {
            collections.create_sb_tree(op, &mut session, cluster_id, None)
        })
        .expect("create");
    assert_eq!(pointer.collection_id, 7);
    assert_eq!(pointer.cluster_id, cluster_id);

    let tree = collections.load_sb_tree(pointer).expect("load");
    let shared_tree = tree.shared_tree();
    let size_map = tree.size_map();
    operations
        .execute_inside_atomic_operation(|op| {
            for position in 1..=500 {
                let key = CompositeKey::of(7, RecordRef::new(100, position));
                assert_eq!(shared_tree.put(op, key, 1)?, None);
            }
            for _ in 0..500 {
                size_map.increment_size(op, pointer.size_slot)?;
            }
            Ok::<_, CollectionError>(())
        })
        .expect("fill");

    assert_eq!(size(&store, &tree), 500);
    let scanned = entries(&store, &tree);
    assert_eq!(scanned.len(), 500);
    assert_eq!(scanned[0].0, RecordRef::new(100, 1));
    assert_eq!(scanned[499].0, RecordRef::new(100, 500));

    let deleted = operations
        .calculate_inside_atomic_operation(|op| collections.delete(op, pointer))
        .expect("delete");
    assert!(deleted);

    let view = operations.read_view().expect("view");
    let (low, high) = CompositeKey::collection_range(7);
    let remaining = shared_tree
        .iterate_between(&view, low, true, high, true)
        .expect("scan")
        .count();
    assert_eq!(remaining, 0);
    assert!(matches!(
        size_map.get_size(&view, pointer.size_slot),
        Err(SizeMapError::DeletedSlot { .. })
    ));
    drop(view);

    let result = operations.execute_inside_atomic_operation(|op| {
        size_map.increment_size(op, pointer.size_slot).map(|_| ())
    });
    assert!(matches!(result, Err(SizeMapError::DeletedSlot { .. })));
}

#[test]
fn test_delete_keeps_neighbours() {
    let dir = tempdir().expect("failed to create temp dir");
    let store = open_store(dir.path());
    let before = create_collection(&store, 1);
    let doomed = create_collection(&store, 1);
    let after = create_collection(&store, 1);
    for tree in [&before, &doomed, &after] {
        put_all(&store, tree, &records(9, 300));
    }

    store
        .operations()
        .calculate_inside_atomic_operation(|op| store.collections().delete(op, doomed.pointer()))
        .expect("delete");

    assert!(entries(&store, &doomed).is_empty());
    assert_eq!(entries(&store, &before).len(), 300);
    assert_eq!(entries(&store, &after).len(), 300);
    assert_eq!(size(&store, &before), 300);
    assert_eq!(size(&store, &after), 300);
}
