//! Test size slots of many collections across bucket pages and restarts.

use crate::collection::{CollectionError, CollectionTree};
use crate::e2e_tests::helpers::*;
use crate::key::RecordRef;
use crate::sizemap::{SizeMapError, max_bucket_size};
use crate::storage::MIN_PAGE_SIZE;
use tempfile::tempdir;

const COLLECTIONS: u32 = 600;

#[test]
fn test_slots_span_buckets_and_survive_reopen() {
    let dir = tempdir().expect("failed to create temp dir");
    let per_bucket = max_bucket_size(MIN_PAGE_SIZE);

    let pointers = {
        let store = open_store(dir.path());
        let trees: Vec<CollectionTree> = store
            .operations()
            .calculate_inside_atomic_operation(|op| {
                (0..COLLECTIONS)
                    .map(|_| store.collections().create_and_load_tree(op, 4))
                    .collect::<Result<Vec<_>, _>>()
            })
            .expect("create");

        // Slots are handed out densely, bucket after bucket
        let slots: Vec<u32> = trees.iter().map(|t| t.pointer().size_slot).collect();
        assert_eq!(slots, (0..COLLECTIONS).collect::<Vec<_>>());
        let view = store.operations().read_view().expect("view");
        let size_map = trees[0].size_map();
        assert_eq!(
            size_map.bucket_count(&view).expect("buckets"),
            COLLECTIONS.div_ceil(per_bucket)
        );
        drop(view);

        // Collection i gets i % 5 entries; every third is deleted
        store
            .operations()
            .execute_inside_atomic_operation(|op| {
                for (i, tree) in trees.iter().enumerate() {
                    for p in 0..i64::try_from(i % 5).expect("fits") {
                        tree.put(op, RecordRef::new(4, p), 1)?;
                    }
                }
                for tree in trees.iter().step_by(3) {
                    store.collections().delete(op, tree.pointer())?;
                }
                Ok::<_, CollectionError>(())
            })
            .expect("fill");

        let pointers: Vec<_> = trees.iter().map(CollectionTree::pointer).collect();
        store.close().expect("close");
        pointers
    };

    let store = open_store(dir.path());
    let view = store.operations().read_view().expect("view");
    for (i, pointer) in pointers.iter().enumerate() {
        let tree = store.collections().load_sb_tree(*pointer).expect("load");
        let size = tree.size(&view);
        if i % 3 == 0 {
            assert!(
                matches!(size, Err(CollectionError::SizeMap(SizeMapError::DeletedSlot { .. }))),
                "slot {} should be deleted",
                pointer.size_slot
            );
        } else {
            let expected = i32::try_from(i % 5).expect("fits");
            assert_eq!(size.expect("size"), expected);
            assert_eq!(tree.entries(&view).expect("entries").len(), i % 5);
        }
    }
}

#[test]
fn test_unknown_slot_is_rejected() {
    let dir = tempdir().expect("failed to create temp dir");
    let store = open_store(dir.path());
    let tree = create_collection(&store, 1);

    let view = store.operations().read_view().expect("view");
    let size_map = tree.size_map();
    let beyond = max_bucket_size(MIN_PAGE_SIZE) * 4;
    assert!(matches!(
        size_map.get_size(&view, beyond),
        Err(SizeMapError::UnknownSlot { .. })
    ));
    assert!(matches!(
        size_map.get_size(&view, tree.pointer().size_slot + 1),
        Err(SizeMapError::UnknownSlot { .. })
    ));
}
