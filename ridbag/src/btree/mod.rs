//! Shared B+tree used to multiplex many collections into one file.
//!
//! # Structure
//!
//! The B-tree consists of:
//! - Internal nodes: store keys and child page pointers
//! - Leaf nodes: store key-value pairs, doubly-linked for range scans
//!
//! # Key Format
//!
//! Keys are 20-byte [`CompositeKey`](crate::key::CompositeKey)s:
//! `(collection_id: i64, cluster: i32, position: i64)`. Values are `i32`.

mod node;
mod tree;

pub use node::{
    InternalNode, KEY_SIZE, LeafEntry, LeafNode, Node, NodeError, NodeHeader, NodeType,
    max_internal_keys, max_leaf_entries,
};
pub use tree::{BTreeError, RangeIter, SharedTree, TREE_EXTENSION};
