//! Size map: per-collection element counts without scanning the tree.
//!
//! Each cluster has one size-map file next to its shared tree. A collection
//! owns one counter slot, addressed by a global slot id.

mod bucket;
mod entry_point;
mod error;
mod size_map;

pub use bucket::{Bucket, max_bucket_size};
pub use entry_point::EntryPoint;
pub use error::SizeMapError;
pub use size_map::{SIZE_MAP_EXTENSION, SizeMap};
