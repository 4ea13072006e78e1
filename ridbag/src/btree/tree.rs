//! Shared B+tree over composite keys.
//!
//! One tree per cluster multiplexes every collection of that cluster; the
//! collection id is the leading component of each [`CompositeKey`].
//!
//! # File Layout
//!
//! - Page 0: meta page (`root: u64` at 8, `entry_count: u64` at 16)
//! - Page 1: initial root leaf
//! - Pages 2+: leaves and internal nodes, appended as nodes split
//!
//! Mutations run inside an [`AtomicOperation`] under the component's
//! exclusive lock. Lookups read through any [`PageAccess`] under the shared
//! lock. Removal does not rebalance; emptied leaves stay linked and are
//! skipped by scans.

use tracing::debug;

use crate::btree::node::{
    InternalNode, LeafEntry, LeafNode, Node, NodeError, NodeHeader, NodeType,
};
use crate::key::CompositeKey;
use crate::storage::{
    AtomicOperation, ComponentError, DurableComponent, FileId, INVALID_FILE_ID, PageAccess,
    PageCache, PageError, PageHeader, PageIndex, PageRead, PageType, PageWrite, StorageError,
};

/// File extension of shared tree files.
pub const TREE_EXTENSION: &str = ".grb";

const META_PAGE: PageIndex = 0;
const META_ROOT_OFFSET: usize = PageHeader::SIZE;
const META_COUNT_OFFSET: usize = PageHeader::SIZE + 8;
const INITIAL_ROOT_PAGE: PageIndex = 1;

/// Contents of the meta page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TreeMeta {
    root: PageIndex,
    entry_count: u64,
}

/// A B+tree stored in one paged file.
#[derive(Debug)]
pub struct SharedTree {
    component: DurableComponent,
}

impl SharedTree {
    /// Handle for the tree named `name`. Call [`Self::create`] or
    /// [`Self::load`] before use.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            component: DurableComponent::new(name, TREE_EXTENSION),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.component.name()
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        self.component.file_name()
    }

    /// Id of the tree's file, or `INVALID_FILE_ID` if not created or loaded.
    pub fn file_id(&self) -> Result<FileId, BTreeError> {
        Ok(self.component.file_id()?)
    }

    /// Create the file with an empty root leaf.
    pub fn create(&self, op: &mut AtomicOperation<'_>) -> Result<(), BTreeError> {
        let mut state = self.component.exclusive()?;
        let file_name = self.component.file_name();

        let file_id = op.calculate_inside_component_operation(file_name, "create", |op| {
            let file_id = op.add_file(file_name)?;
            {
                let mut meta = op.add_page(file_id)?;
                PageHeader::init(&mut meta, PageType::TreeMeta);
                meta.set_u64(META_ROOT_OFFSET, INITIAL_ROOT_PAGE);
                meta.set_u64(META_COUNT_OFFSET, 0);
            }
            let mut root = op.add_page(file_id)?;
            LeafNode::new(0).write(&mut root)?;
            Ok::<_, BTreeError>(file_id)
        })?;

        state.file_id = file_id;
        debug!(tree = file_name, file_id, "Created shared tree");
        Ok(())
    }

    /// Open the tree's existing file. Returns false if there is none.
    pub fn load(&self, cache: &PageCache) -> Result<bool, BTreeError> {
        let mut state = self.component.exclusive()?;
        let file_name = self.component.file_name();

        let Some(file_id) = cache
            .file_id(file_name)
            .map_err(|e| e.in_component(file_name, "load"))?
        else {
            return Ok(false);
        };
        state.file_id = file_id;
        debug!(tree = file_name, file_id, "Loaded shared tree");
        Ok(true)
    }

    /// Delete the tree's file when the operation commits.
    ///
    /// The handle must not be used afterwards.
    pub fn delete(&self, op: &mut AtomicOperation<'_>) -> Result<(), BTreeError> {
        let state = self.component.exclusive()?;
        let file_id = checked(state.file_id, self.file_name())?;
        op.calculate_inside_component_operation(self.file_name(), "delete", |op| {
            op.delete_file(file_id)
        })?;
        debug!(tree = self.file_name(), file_id, "Deleted shared tree");
        Ok(())
    }

    /// Insert or update an entry. Returns the previous value.
    pub fn put(
        &self,
        op: &mut AtomicOperation<'_>,
        key: CompositeKey,
        value: i32,
    ) -> Result<Option<i32>, BTreeError> {
        let state = self.component.exclusive()?;
        let file_id = checked(state.file_id, self.file_name())?;
        op.calculate_inside_component_operation(self.file_name(), "put", |op| {
            put_entry(op, file_id, key, value)
        })
    }

    /// Remove an entry. Returns the removed value.
    pub fn remove(
        &self,
        op: &mut AtomicOperation<'_>,
        key: &CompositeKey,
    ) -> Result<Option<i32>, BTreeError> {
        let state = self.component.exclusive()?;
        let file_id = checked(state.file_id, self.file_name())?;
        op.calculate_inside_component_operation(self.file_name(), "remove", |op| {
            remove_entry(op, file_id, key)
        })
    }

    /// Look up a value by key.
    pub fn get(
        &self,
        access: &impl PageAccess,
        key: &CompositeKey,
    ) -> Result<Option<i32>, BTreeError> {
        let file_id = self.read_file_id()?;
        let meta = read_meta(access, file_id)?;
        let leaf_index = find_leaf(access, file_id, meta.root, key)?;
        Ok(read_leaf(access, file_id, leaf_index)?.get(key))
    }

    /// Number of entries in the tree.
    pub fn entry_count(&self, access: &impl PageAccess) -> Result<u64, BTreeError> {
        let file_id = self.read_file_id()?;
        Ok(read_meta(access, file_id)?.entry_count)
    }

    /// Iterate entries between `low` and `high` in ascending key order.
    pub fn iterate_between<'a, A: PageAccess>(
        &self,
        access: &'a A,
        low: CompositeKey,
        low_inclusive: bool,
        high: CompositeKey,
        high_inclusive: bool,
    ) -> Result<RangeIter<'a, A>, BTreeError> {
        let file_id = self.read_file_id()?;
        let meta = read_meta(access, file_id)?;
        let leaf_index = find_leaf(access, file_id, meta.root, &low)?;
        let leaf = read_leaf(access, file_id, leaf_index)?;

        let position = leaf.entries.partition_point(|e| {
            if low_inclusive {
                e.key < low
            } else {
                e.key <= low
            }
        });

        Ok(RangeIter {
            access,
            file_id,
            entries: leaf.entries,
            position,
            next_leaf: leaf.header.next_leaf,
            high,
            high_inclusive,
            done: false,
        })
    }

    /// Whether any key lies in `[low, high]`.
    pub fn has_entries_between(
        &self,
        access: &impl PageAccess,
        low: CompositeKey,
        high: CompositeKey,
    ) -> Result<bool, BTreeError> {
        let mut iter = self.iterate_between(access, low, true, high, true)?;
        Ok(iter.next_entry()?.is_some())
    }

    /// Smallest key in the tree.
    pub fn first_key(&self, access: &impl PageAccess) -> Result<Option<CompositeKey>, BTreeError> {
        let file_id = self.read_file_id()?;
        let meta = read_meta(access, file_id)?;

        let mut page_index = edge_leaf(access, file_id, meta.root, Edge::First)?;
        loop {
            let leaf = read_leaf(access, file_id, page_index)?;
            if let Some(entry) = leaf.entries.first() {
                return Ok(Some(entry.key));
            }
            if leaf.header.next_leaf == 0 {
                return Ok(None);
            }
            page_index = leaf.header.next_leaf;
        }
    }

    /// Largest key in the tree.
    pub fn last_key(&self, access: &impl PageAccess) -> Result<Option<CompositeKey>, BTreeError> {
        let file_id = self.read_file_id()?;
        let meta = read_meta(access, file_id)?;

        let mut page_index = edge_leaf(access, file_id, meta.root, Edge::Last)?;
        loop {
            let leaf = read_leaf(access, file_id, page_index)?;
            if let Some(entry) = leaf.entries.last() {
                return Ok(Some(entry.key));
            }
            if leaf.header.prev_leaf == 0 {
                return Ok(None);
            }
            page_index = leaf.header.prev_leaf;
        }
    }

    /// Smallest key in `[low, high]`.
    pub fn first_key_between(
        &self,
        access: &impl PageAccess,
        low: CompositeKey,
        high: CompositeKey,
    ) -> Result<Option<CompositeKey>, BTreeError> {
        let mut iter = self.iterate_between(access, low, true, high, true)?;
        Ok(iter.next_entry()?.map(|(key, _)| key))
    }

    /// Largest key in `[low, high]`.
    ///
    /// Starts at the leaf that would hold `high` and walks back over empty
    /// leaves.
    pub fn last_key_between(
        &self,
        access: &impl PageAccess,
        low: CompositeKey,
        high: CompositeKey,
    ) -> Result<Option<CompositeKey>, BTreeError> {
        let file_id = self.read_file_id()?;
        let meta = read_meta(access, file_id)?;

        let mut page_index = find_leaf(access, file_id, meta.root, &high)?;
        loop {
            let leaf = read_leaf(access, file_id, page_index)?;
            if let Some(entry) = leaf.entries.iter().rev().find(|e| e.key <= high) {
                return Ok((entry.key >= low).then_some(entry.key));
            }
            if leaf.header.prev_leaf == 0 {
                return Ok(None);
            }
            page_index = leaf.header.prev_leaf;
        }
    }

    fn read_file_id(&self) -> Result<FileId, BTreeError> {
        let state = self.component.shared()?;
        checked(state.file_id, self.file_name())
    }
}

fn checked(file_id: FileId, file_name: &str) -> Result<FileId, BTreeError> {
    if file_id == INVALID_FILE_ID {
        return Err(BTreeError::NotLoaded(file_name.to_string()));
    }
    Ok(file_id)
}

fn put_entry(
    op: &mut AtomicOperation<'_>,
    file_id: FileId,
    key: CompositeKey,
    value: i32,
) -> Result<Option<i32>, BTreeError> {
    let mut meta = read_meta(op, file_id)?;
    let root_before = meta.root;

    let leaf_index = find_leaf(op, file_id, meta.root, &key)?;
    let mut leaf = read_leaf(op, file_id, leaf_index)?;
    let old = leaf.insert(key, value);

    if leaf.is_overfull(op.page_size()) {
        split_leaf(op, file_id, &mut meta, leaf_index, leaf)?;
    } else {
        write_leaf(op, file_id, leaf_index, &leaf)?;
    }

    if old.is_none() {
        meta.entry_count += 1;
    }
    if old.is_none() || meta.root != root_before {
        write_meta(op, file_id, meta)?;
    }
    Ok(old)
}

fn remove_entry(
    op: &mut AtomicOperation<'_>,
    file_id: FileId,
    key: &CompositeKey,
) -> Result<Option<i32>, BTreeError> {
    let mut meta = read_meta(op, file_id)?;
    let leaf_index = find_leaf(op, file_id, meta.root, key)?;
    let mut leaf = read_leaf(op, file_id, leaf_index)?;

    let Some(old) = leaf.remove(key) else {
        return Ok(None);
    };
    write_leaf(op, file_id, leaf_index, &leaf)?;

    meta.entry_count = meta.entry_count.saturating_sub(1);
    write_meta(op, file_id, meta)?;
    Ok(Some(old))
}

/// Split an overfull leaf and push the split key into its parent.
fn split_leaf(
    op: &mut AtomicOperation<'_>,
    file_id: FileId,
    meta: &mut TreeMeta,
    leaf_index: PageIndex,
    mut leaf: LeafNode,
) -> Result<(), BTreeError> {
    let (split_key, mut right) = leaf.split();
    let old_next = leaf.header.next_leaf;

    right.header.prev_leaf = leaf_index;
    let right_index = append_node(op, file_id, &Node::Leaf(right))?;

    leaf.header.next_leaf = right_index;
    write_leaf(op, file_id, leaf_index, &leaf)?;

    if old_next != 0 {
        let mut guard = op.load_page_for_write(file_id, old_next)?;
        let mut header = NodeHeader::read(&guard)?;
        header.prev_leaf = right_index;
        header.write(&mut guard);
    }

    insert_into_parent(
        op,
        file_id,
        meta,
        leaf_index,
        split_key,
        right_index,
        leaf.header.parent_page,
    )
}

/// Insert a separator key and right child after a split.
fn insert_into_parent(
    op: &mut AtomicOperation<'_>,
    file_id: FileId,
    meta: &mut TreeMeta,
    left_index: PageIndex,
    key: CompositeKey,
    right_index: PageIndex,
    parent_index: PageIndex,
) -> Result<(), BTreeError> {
    if parent_index == 0 {
        return create_new_root(op, file_id, meta, left_index, key, right_index);
    }

    let mut parent = read_internal(op, file_id, parent_index)?;
    parent.insert(key, right_index);

    if !parent.is_overfull(op.page_size()) {
        write_internal(op, file_id, parent_index, &parent)?;
        return Ok(());
    }

    let (median_key, right_parent) = parent.split();
    let grandparent = parent.header.parent_page;
    let children = right_parent.children.clone();
    let right_parent_index = append_node(op, file_id, &Node::Internal(right_parent))?;
    write_internal(op, file_id, parent_index, &parent)?;

    // Children that moved to the new node need their parent pointer updated
    for child in children {
        update_parent_pointer(op, file_id, child, right_parent_index)?;
    }

    insert_into_parent(
        op,
        file_id,
        meta,
        parent_index,
        median_key,
        right_parent_index,
        grandparent,
    )
}

fn create_new_root(
    op: &mut AtomicOperation<'_>,
    file_id: FileId,
    meta: &mut TreeMeta,
    left_index: PageIndex,
    key: CompositeKey,
    right_index: PageIndex,
) -> Result<(), BTreeError> {
    let root = InternalNode::with_children(0, left_index, key, right_index);
    let root_index = append_node(op, file_id, &Node::Internal(root))?;

    update_parent_pointer(op, file_id, left_index, root_index)?;
    update_parent_pointer(op, file_id, right_index, root_index)?;

    meta.root = root_index;
    debug!(file_id, root = root_index, "Tree grew a new root");
    Ok(())
}

fn update_parent_pointer(
    op: &mut AtomicOperation<'_>,
    file_id: FileId,
    page_index: PageIndex,
    parent_index: PageIndex,
) -> Result<(), BTreeError> {
    let mut guard = op.load_page_for_write(file_id, page_index)?;
    let mut header = NodeHeader::read(&guard)?;
    header.parent_page = parent_index;
    header.write(&mut guard);
    Ok(())
}

#[derive(Clone, Copy)]
enum Edge {
    First,
    Last,
}

/// Descend to the leftmost or rightmost leaf.
fn edge_leaf(
    access: &impl PageAccess,
    file_id: FileId,
    root: PageIndex,
    edge: Edge,
) -> Result<PageIndex, BTreeError> {
    let mut page_index = root;
    loop {
        let page = access.load_page_for_read(file_id, page_index)?;
        if NodeHeader::read(&page)?.node_type == NodeType::Leaf {
            return Ok(page_index);
        }
        let node = InternalNode::read(&page)?;
        let child = match edge {
            Edge::First => node.children.first(),
            Edge::Last => node.children.last(),
        };
        page_index = next_child(child.copied(), page_index)?;
    }
}

/// Descend to the leaf that would hold `key`.
fn find_leaf(
    access: &impl PageAccess,
    file_id: FileId,
    root: PageIndex,
    key: &CompositeKey,
) -> Result<PageIndex, BTreeError> {
    let mut page_index = root;
    loop {
        let page = access.load_page_for_read(file_id, page_index)?;
        if NodeHeader::read(&page)?.node_type == NodeType::Leaf {
            return Ok(page_index);
        }
        let node = InternalNode::read(&page)?;
        let child = node.children.get(node.find_child_index(key)).copied();
        page_index = next_child(child, page_index)?;
    }
}

fn next_child(child: Option<PageIndex>, page_index: PageIndex) -> Result<PageIndex, BTreeError> {
    match child {
        Some(child) if child != 0 => Ok(child),
        _ => Err(BTreeError::Corrupt(format!(
            "internal node {page_index} has a missing child"
        ))),
    }
}

fn read_meta(access: &impl PageAccess, file_id: FileId) -> Result<TreeMeta, BTreeError> {
    let page = access.load_page_for_read(file_id, META_PAGE)?;
    PageHeader::expect_type(&page, PageType::TreeMeta)?;
    Ok(TreeMeta {
        root: page.get_u64(META_ROOT_OFFSET),
        entry_count: page.get_u64(META_COUNT_OFFSET),
    })
}

fn write_meta(
    op: &mut AtomicOperation<'_>,
    file_id: FileId,
    meta: TreeMeta,
) -> Result<(), BTreeError> {
    let mut page = op.load_page_for_write(file_id, META_PAGE)?;
    page.set_u64(META_ROOT_OFFSET, meta.root);
    page.set_u64(META_COUNT_OFFSET, meta.entry_count);
    Ok(())
}

fn read_leaf(
    access: &impl PageAccess,
    file_id: FileId,
    page_index: PageIndex,
) -> Result<LeafNode, BTreeError> {
    let page = access.load_page_for_read(file_id, page_index)?;
    Ok(LeafNode::read(&page)?)
}

fn read_internal(
    access: &impl PageAccess,
    file_id: FileId,
    page_index: PageIndex,
) -> Result<InternalNode, BTreeError> {
    let page = access.load_page_for_read(file_id, page_index)?;
    Ok(InternalNode::read(&page)?)
}

fn write_leaf(
    op: &mut AtomicOperation<'_>,
    file_id: FileId,
    page_index: PageIndex,
    leaf: &LeafNode,
) -> Result<(), BTreeError> {
    let mut page = op.load_page_for_write(file_id, page_index)?;
    Ok(leaf.write(&mut page)?)
}

fn write_internal(
    op: &mut AtomicOperation<'_>,
    file_id: FileId,
    page_index: PageIndex,
    node: &InternalNode,
) -> Result<(), BTreeError> {
    let mut page = op.load_page_for_write(file_id, page_index)?;
    Ok(node.write(&mut page)?)
}

fn append_node(
    op: &mut AtomicOperation<'_>,
    file_id: FileId,
    node: &Node,
) -> Result<PageIndex, BTreeError> {
    let mut page = op.add_page(file_id)?;
    node.write(&mut page)?;
    Ok(page.page_index())
}

/// Ascending scan over a key range, following leaf links.
pub struct RangeIter<'a, A: PageAccess> {
    access: &'a A,
    file_id: FileId,
    entries: Vec<LeafEntry>,
    position: usize,
    next_leaf: PageIndex,
    high: CompositeKey,
    high_inclusive: bool,
    done: bool,
}

impl<A: PageAccess> RangeIter<'_, A> {
    /// Get the next entry in the range.
    pub fn next_entry(&mut self) -> Result<Option<(CompositeKey, i32)>, BTreeError> {
        loop {
            if self.done {
                return Ok(None);
            }

            if let Some(&entry) = self.entries.get(self.position) {
                let past_end = if self.high_inclusive {
                    entry.key > self.high
                } else {
                    entry.key >= self.high
                };
                if past_end {
                    self.done = true;
                    return Ok(None);
                }
                self.position += 1;
                return Ok(Some((entry.key, entry.value)));
            }

            if self.next_leaf == 0 {
                self.done = true;
                return Ok(None);
            }
            let leaf = read_leaf(self.access, self.file_id, self.next_leaf)?;
            self.entries = leaf.entries;
            self.position = 0;
            self.next_leaf = leaf.header.next_leaf;
        }
    }
}

impl<A: PageAccess> Iterator for RangeIter<'_, A> {
    type Item = Result<(CompositeKey, i32), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.next_entry();
        if result.is_err() {
            self.done = true;
        }
        result.transpose()
    }
}

/// Errors that can occur during B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Page or file access failed.
    Storage(StorageError),
    /// A node could not be decoded or encoded.
    Node(NodeError),
    /// The tree was used before create or load.
    NotLoaded(String),
    /// The tree structure is inconsistent.
    Corrupt(String),
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::NotLoaded(name) => write!(f, "tree {name} is not loaded"),
            Self::Corrupt(msg) => write!(f, "corrupt tree: {msg}"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::NotLoaded(_) | Self::Corrupt(_) => None,
        }
    }
}

impl From<StorageError> for BTreeError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<NodeError> for BTreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

impl From<PageError> for BTreeError {
    fn from(e: PageError) -> Self {
        Self::Node(NodeError::Page(e))
    }
}

impl ComponentError for BTreeError {
    fn with_component_context(self, component: &str, operation: &'static str) -> Self {
        match self {
            Self::Storage(e) => Self::Storage(e.in_component(component, operation)),
            other => other,
        }
    }
}
