//! Test the prohibited mode of the collection manager.

use crate::collection::{CollectionError, Session};
use crate::e2e_tests::helpers::*;
use crate::key::RecordRef;
use tempfile::tempdir;

#[test]
fn test_prohibited_manager_refuses_everything() {
    let dir = tempdir().expect("failed to create temp dir");
    let store = open_store(dir.path());
    let tree = create_collection(&store, 1);
    put_all(&store, &tree, &records(1, 5));

    let collections = store.collections();
    let operations = store.operations();
    collections.prohibit_access();
    assert!(collections.is_access_prohibited());

    let mut session = Session::new();
    let result = operations.calculate_inside_atomic_operation(|op| {
        collections.create_sb_tree(op, &mut session, 1, None)
    });
    let err = result.expect_err("create must fail");
    assert!(matches!(err, CollectionError::AccessProhibited));
    assert!(err.to_string().contains("prohibited"));

    assert!(matches!(
        collections.load_sb_tree(tree.pointer()),
        Err(CollectionError::AccessProhibited)
    ));
    assert!(matches!(
        operations.calculate_inside_atomic_operation(|op| collections.delete(op, tree.pointer())),
        Err(CollectionError::AccessProhibited)
    ));
    assert!(matches!(
        operations.execute_inside_atomic_operation(|op| collections.create_cluster_storage(op, 9).map(|_| ())),
        Err(CollectionError::AccessProhibited)
    ));
    assert!(matches!(
        collections.load_existing_clusters(),
        Err(CollectionError::AccessProhibited)
    ));
    assert!(session.collection_changes().is_empty());

    // Data is untouched and readable by a manager that is not prohibited
    drop(store);
    let store = open_store(dir.path());
    assert!(!store.collections().is_access_prohibited());
    let tree = store.collections().load_sb_tree(tree.pointer()).expect("load");
    assert_eq!(size(&store, &tree), 5);
    let view = store.operations().read_view().expect("view");
    assert_eq!(tree.get(&view, RecordRef::new(1, 4)).expect("get"), Some(1));
}
