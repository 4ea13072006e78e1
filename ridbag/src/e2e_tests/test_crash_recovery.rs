//! Test that commits interrupted after the WAL sync are redone on open.

use crate::collection::CollectionError;
use crate::e2e_tests::helpers::*;
use crate::key::RecordRef;
use crate::storage::StorageError;
use tempfile::tempdir;

#[test]
fn test_interrupted_commit_is_replayed() {
    let dir = tempdir().expect("failed to create temp dir");

    let (kept, crashed) = {
        let store = open_store(dir.path());
        let kept = create_collection(&store, 5);
        put_all(&store, &kept, &records(5, 100));

        // Everything after this point only reaches the WAL
        store.operations().simulate_crash_before_install();
        let crashed = store
            .operations()
            .calculate_inside_atomic_operation(|op| {
                let tree = store.collections().create_and_load_tree(op, 6)?;
                for record in records(6, 700) {
                    tree.put(op, record, 2)?;
                }
                for record in records(5, 40) {
                    kept.remove(op, record)?;
                }
                Ok::<_, CollectionError>(tree.pointer())
            })
            .expect("commit");
        (kept.pointer(), crashed)
    };

    let store = open_store(dir.path());
    assert_eq!(store.collections().cluster_ids().expect("clusters"), vec![5, 6]);

    let kept = store.collections().load_sb_tree(kept).expect("load kept");
    let scanned = entries(&store, &kept);
    assert_eq!(scanned.len(), 60);
    assert_eq!(scanned[0].0, RecordRef::new(5, 40));
    assert_eq!(size(&store, &kept), 60);

    let crashed = store.collections().load_sb_tree(crashed).expect("load crashed");
    assert_eq!(entries(&store, &crashed).len(), 700);
    assert_eq!(size(&store, &crashed), 700);
}

#[test]
fn test_reopen_continues_id_allocation() {
    let dir = tempdir().expect("failed to create temp dir");

    let last_id = {
        let store = open_store(dir.path());
        let mut last = None;
        for _ in 0..5 {
            let tree = create_collection(&store, 2);
            put_all(&store, &tree, &records(2, 3));
            last = Some(tree.collection_id());
        }
        store.close().expect("close");
        last.expect("created")
    };

    let store = open_store(dir.path());
    let tree = create_collection(&store, 2);
    assert!(tree.collection_id() > last_id);
    assert_eq!(size(&store, &tree), 0);
}

#[test]
fn test_failed_install_is_finished_by_reopen() {
    let dir = tempdir().expect("failed to create temp dir");
    // The size map file cannot be created while a directory holds its name
    let blocker = dir.path().join("global_collection_5.grs");
    std::fs::create_dir(&blocker).expect("create dir");

    {
        let store = open_store(dir.path());
        let result = store.operations().execute_inside_atomic_operation(|op| {
            let tree = store.collections().create_and_load_tree(op, 5)?;
            tree.put(op, RecordRef::new(5, 1), 9)?;
            Ok::<_, CollectionError>(())
        });
        assert!(result.is_err());
        assert!(store.collections().cluster_storage(5).expect("lookup").is_none());

        // Unrelated work is refused instead of truncating the log
        let result = store.operations().calculate_inside_atomic_operation(|op| {
            store.collections().create_and_load_tree(op, 1)
        });
        assert!(matches!(
            result,
            Err(CollectionError::Storage(StorageError::RecoveryRequired))
        ));
        assert!(matches!(
            store.operations().read_view(),
            Err(StorageError::RecoveryRequired)
        ));
        store.close().expect("close");
    }

    std::fs::remove_dir(&blocker).expect("remove dir");
    let store = open_store(dir.path());
    assert_eq!(store.collections().cluster_ids().expect("clusters"), vec![5]);

    let storage = store
        .collections()
        .cluster_storage(5)
        .expect("lookup")
        .expect("registered");
    {
        let view = store.operations().read_view().expect("view");
        assert_eq!(storage.tree().entry_count(&view).expect("count"), 1);
        assert_eq!(storage.size_map().bucket_count(&view).expect("buckets"), 1);
    }

    let tree = create_collection(&store, 5);
    assert_eq!(tree.collection_id(), 2);
}
