//! Tree-based collections.
//!
//! Every collection of a cluster lives in the cluster's [`SharedTree`], keyed
//! by `(collection id, record)`, with its entry count in the cluster's
//! [`SizeMap`]. Records hold a [`CollectionPointer`] to find it again.
//!
//! [`SharedTree`]: crate::btree::SharedTree
//! [`SizeMap`]: crate::sizemap::SizeMap

mod cluster;
mod error;
mod manager;
mod pointer;
mod session;
mod tree;

pub use cluster::{ClusterStorage, FILE_NAME_PREFIX, component_name, parse_tree_file_name};
pub use error::CollectionError;
pub use manager::CollectionManager;
pub use pointer::{CollectionPointer, CollectionRef};
pub use session::Session;
pub use tree::CollectionTree;
