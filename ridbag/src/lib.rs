// Life of a collection entry:
// 1. A record asks the collection manager for a tree-based collection
// 2. The manager picks an unused collection id and a size slot in the
//    cluster's shared tree and size map
// 3. Puts and removes run inside an atomic operation:
//     - Tree pages are changed under the tree's exclusive lock
//     - The size slot is incremented or decremented in the same operation
//     - On commit, the page changes go to the WAL, then to the page cache
//
// System components:
//  - Paged storage with atomic operations and WAL recovery
//  - Shared B+tree keyed by (collection id, record)
//  - Size map of per-collection counters
//  - Collection manager

pub mod btree;
pub mod collection;
pub mod config;
pub mod key;
pub mod sizemap;
pub mod storage;
pub mod store;

#[cfg(test)]
mod e2e_tests;
