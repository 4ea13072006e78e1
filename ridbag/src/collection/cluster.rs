use crate::btree::SharedTree;
use crate::sizemap::SizeMap;

/// Prefix of every per-cluster storage file.
pub const FILE_NAME_PREFIX: &str = "global_collection_";

/// The shared tree and size map backing every collection of one cluster.
#[derive(Debug)]
pub struct ClusterStorage {
    cluster_id: i32,
    tree: SharedTree,
    size_map: SizeMap,
}

impl ClusterStorage {
    /// Handles for the cluster's files. Nothing is opened yet.
    #[must_use]
    pub fn new(cluster_id: i32) -> Self {
        let name = component_name(cluster_id);
        Self {
            cluster_id,
            tree: SharedTree::new(&name),
            size_map: SizeMap::new(&name),
        }
    }

    #[must_use]
    pub const fn cluster_id(&self) -> i32 {
        self.cluster_id
    }

    #[must_use]
    pub const fn tree(&self) -> &SharedTree {
        &self.tree
    }

    #[must_use]
    pub const fn size_map(&self) -> &SizeMap {
        &self.size_map
    }
}

/// Name shared by the cluster's tree and size map files.
#[must_use]
pub fn component_name(cluster_id: i32) -> String {
    format!("{FILE_NAME_PREFIX}{cluster_id}")
}

/// Cluster id encoded in a tree file name, if it is one.
#[must_use]
pub fn parse_tree_file_name(file_name: &str) -> Option<i32> {
    file_name
        .strip_prefix(FILE_NAME_PREFIX)?
        .strip_suffix(crate::btree::TREE_EXTENSION)?
        .parse()
        .ok()
}
