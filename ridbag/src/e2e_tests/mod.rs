//! End-to-end tests at the store level.
//!
//! Each test file covers one scenario against a [`Store`] in a temporary
//! directory, going through the collection manager, the shared tree, the size
//! map and the atomic operation layer together.
//!
//! [`Store`]: crate::store::Store

#![cfg(test)]

mod helpers;

mod test_collection_range;
mod test_crash_recovery;
mod test_delete_scenario;
mod test_id_uniqueness;
mod test_prohibition;
mod test_rollback;
mod test_size_slots;
