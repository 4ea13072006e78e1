//! Test that collections sharing a tree stay separate.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::collection::CollectionError;
use crate::e2e_tests::helpers::*;
use crate::key::RecordRef;
use tempfile::tempdir;

#[test]
fn test_interleaved_inserts_scan_back_in_order() {
    let dir = tempdir().expect("failed to create temp dir");
    let store = open_store(dir.path());
    let trees: Vec<_> = (0..4).map(|_| create_collection(&store, 3)).collect();

    // Same records in every collection, inserted in one shuffled stream
    let mut inserts: Vec<(usize, RecordRef)> = (0..trees.len())
        .flat_map(|t| {
            (-200..200)
                .map(move |p| (t, RecordRef::new(i32::try_from(p % 7).expect("fits"), p)))
        })
        .collect();
    inserts.shuffle(&mut StdRng::seed_from_u64(7));

    store
        .operations()
        .execute_inside_atomic_operation(|op| {
            for (t, record) in &inserts {
                trees[*t].put(op, *record, i32::try_from(*t).expect("fits"))?;
            }
            Ok::<_, CollectionError>(())
        })
        .expect("insert");

    for (t, tree) in trees.iter().enumerate() {
        let scanned = entries(&store, tree);
        assert_eq!(scanned.len(), 400);
        assert!(scanned.windows(2).all(|w| w[0].0 < w[1].0));
        let expected = i32::try_from(t).expect("fits");
        assert!(scanned.iter().all(|(_, value)| *value == expected));
        assert_eq!(size(&store, tree), 400);
    }
}

#[test]
fn test_extreme_records_stay_in_their_collection() {
    let dir = tempdir().expect("failed to create temp dir");
    let store = open_store(dir.path());
    let low = create_collection(&store, 1);
    let mid = create_collection(&store, 1);
    let high = create_collection(&store, 1);

    put_all(&store, &low, &[RecordRef::MAX]);
    put_all(&store, &mid, &[RecordRef::MIN, RecordRef::new(0, 0), RecordRef::MAX]);
    put_all(&store, &high, &[RecordRef::MIN]);

    let scanned: Vec<RecordRef> = entries(&store, &mid).into_iter().map(|(r, _)| r).collect();
    assert_eq!(
        scanned,
        vec![RecordRef::MIN, RecordRef::new(0, 0), RecordRef::MAX]
    );

    let view = store.operations().read_view().expect("view");
    assert_eq!(mid.first_key(&view).expect("first"), Some(RecordRef::MIN));
    assert_eq!(mid.last_key(&view).expect("last"), Some(RecordRef::MAX));
    assert_eq!(low.first_key(&view).expect("first"), Some(RecordRef::MAX));
    assert_eq!(high.last_key(&view).expect("last"), Some(RecordRef::MIN));
}
