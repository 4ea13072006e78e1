//! Test collection id allocation from many threads.

use std::collections::HashSet;

use crate::collection::CollectionError;
use crate::e2e_tests::helpers::*;
use crate::key::{CollectionId, CompositeKey};
use tempfile::tempdir;

const THREADS: usize = 8;
const IDS_PER_THREAD: usize = 1250;
const IDS_PER_OPERATION: usize = 50;
const CLUSTERS: i32 = 3;

#[test]
fn test_ten_thousand_concurrent_ids_are_unique() {
    let dir = tempdir().expect("failed to create temp dir");
    let store = open_store(dir.path());
    let collections = store.collections();
    let operations = store.operations();

    // Entries already sit under some ids in every cluster's tree
    let occupied: Vec<CollectionId> = (2..10_000).step_by(97).collect();
    for cluster_id in 0..CLUSTERS {
        let tree = create_collection(&store, cluster_id);
        operations
            .execute_inside_atomic_operation(|op| {
                for &id in &occupied {
                    tree.shared_tree()
                        .put(op, CompositeKey::new(id, cluster_id, 0), 1)?;
                }
                Ok::<_, CollectionError>(())
            })
            .expect("seed");
    }

    let allocated: Vec<(i32, CollectionId)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|thread| {
                scope.spawn(move || {
                    let cluster_id = i32::try_from(thread).expect("fits") % CLUSTERS;
                    let mut ids = Vec::with_capacity(IDS_PER_THREAD);
                    for _ in 0..IDS_PER_THREAD / IDS_PER_OPERATION {
                        let batch = operations
                            .calculate_inside_atomic_operation(|op| {
                                (0..IDS_PER_OPERATION)
                                    .map(|_| {
                                        collections
                                            .create_and_load_tree(op, cluster_id)
                                            .map(|tree| (cluster_id, tree.collection_id()))
                                    })
                                    .collect::<Result<Vec<_>, _>>()
                            })
                            .expect("allocate");
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

    assert_eq!(allocated.len(), THREADS * IDS_PER_THREAD);
    let unique: HashSet<CollectionId> = allocated.iter().map(|(_, id)| *id).collect();
    assert_eq!(unique.len(), allocated.len());
    assert!(unique.iter().all(|id| *id >= 1));

    // No id was handed out where entries already existed
    let view = operations.read_view().expect("view");
    for (cluster_id, id) in &allocated {
        assert!(!occupied.contains(id), "collection id {id} was occupied");
        let storage = collections
            .cluster_storage(*cluster_id)
            .expect("lookup")
            .expect("registered");
        let (low, high) = CompositeKey::collection_range(*id);
        assert!(
            !storage
                .tree()
                .has_entries_between(&view, low, high)
                .expect("range check")
        );
    }
}
