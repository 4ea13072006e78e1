//! B-tree node types and serialization.
//!
//! Nodes are parsed out of a page into owned structs, modified, and written
//! back. Parsing goes through [`PageRead`], so a node decodes the same from a
//! committed page and from a page with uncommitted changes.
//!
//! - Internal nodes: store keys and child page pointers
//! - Leaf nodes: store key-value pairs, doubly-linked for range scans
//!
//! Page 0 of a tree file is the meta page, so page index 0 doubles as the
//! "no page" marker in parent and sibling pointers.

#![allow(clippy::cast_possible_truncation)]

use crate::key::{CompositeKey, KeyError};
use crate::storage::{PageError, PageHeader, PageIndex, PageRead, PageType, PageWrite};

/// Size of a key in bytes.
pub const KEY_SIZE: usize = CompositeKey::SERIALIZED_SIZE;

/// Node header layout (after page header):
/// - `node_type`: 1 byte (0 = internal, 1 = leaf)
/// - `key_count`: 2 bytes
/// - `parent_page`: 8 bytes
/// - `prev_leaf`: 8 bytes (only for leaf nodes, 0 if none)
/// - `next_leaf`: 8 bytes (only for leaf nodes, 0 if none)
///
/// Total: 27 bytes
const NODE_HEADER_SIZE: usize = 27;

/// Offset where node data starts (after page header + node header).
const DATA_OFFSET: usize = PageHeader::SIZE + NODE_HEADER_SIZE;

/// Leaf entry size: key (20 bytes) + value (4 bytes).
const LEAF_ENTRY_SIZE: usize = KEY_SIZE + 4;

/// Internal node entry size: key (20 bytes) + child pointer (8 bytes).
const INTERNAL_ENTRY_SIZE: usize = KEY_SIZE + 8;

/// Maximum number of entries in a leaf node.
#[must_use]
pub const fn max_leaf_entries(page_size: usize) -> usize {
    (page_size - DATA_OFFSET) / LEAF_ENTRY_SIZE
}

/// Maximum number of keys in an internal node.
///
/// N keys and N+1 child pointers must fit:
/// `data_space` = N * 20 + (N+1) * 8, so N = (`data_space` - 8) / 28
#[must_use]
pub const fn max_internal_keys(page_size: usize) -> usize {
    (page_size - DATA_OFFSET - 8) / INTERNAL_ENTRY_SIZE
}

/// Node type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Internal = 0,
    Leaf = 1,
}

impl TryFrom<u8> for NodeType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Internal),
            1 => Ok(Self::Leaf),
            _ => Err(value),
        }
    }
}

/// Header information for a B-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub node_type: NodeType,
    pub key_count: u16,
    pub parent_page: PageIndex,
    pub prev_leaf: PageIndex,
    pub next_leaf: PageIndex,
}

impl NodeHeader {
    const fn new(node_type: NodeType, parent_page: PageIndex) -> Self {
        Self {
            node_type,
            key_count: 0,
            parent_page,
            prev_leaf: 0,
            next_leaf: 0,
        }
    }

    /// Read a node header from a page.
    pub fn read(page: &impl PageRead) -> Result<Self, NodeError> {
        let offset = PageHeader::SIZE;
        let node_type =
            NodeType::try_from(page.get_u8(offset)).map_err(|_| NodeError::InvalidHeader)?;

        let expected = match node_type {
            NodeType::Internal => PageType::TreeInternal,
            NodeType::Leaf => PageType::TreeLeaf,
        };
        PageHeader::expect_type(page, expected)?;

        Ok(Self {
            node_type,
            key_count: page.get_u16(offset + 1),
            parent_page: page.get_u64(offset + 3),
            prev_leaf: page.get_u64(offset + 11),
            next_leaf: page.get_u64(offset + 19),
        })
    }

    /// Write a node header to a page.
    pub fn write(&self, page: &mut impl PageWrite) {
        let offset = PageHeader::SIZE;
        let mut bytes = [0u8; NODE_HEADER_SIZE];
        bytes[0] = self.node_type as u8;
        bytes[1..3].copy_from_slice(&self.key_count.to_le_bytes());
        bytes[3..11].copy_from_slice(&self.parent_page.to_le_bytes());
        bytes[11..19].copy_from_slice(&self.prev_leaf.to_le_bytes());
        bytes[19..27].copy_from_slice(&self.next_leaf.to_le_bytes());
        page.set_bytes(offset, &bytes);
    }
}

/// A node of either type.
#[derive(Debug)]
pub enum Node {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl Node {
    /// Read whichever node type the page holds.
    pub fn read(page: &impl PageRead) -> Result<Self, NodeError> {
        match NodeHeader::read(page)?.node_type {
            NodeType::Internal => Ok(Self::Internal(InternalNode::read(page)?)),
            NodeType::Leaf => Ok(Self::Leaf(LeafNode::read(page)?)),
        }
    }

    /// Write the node to a page.
    pub fn write(&self, page: &mut impl PageWrite) -> Result<(), NodeError> {
        match self {
            Self::Internal(node) => node.write(page),
            Self::Leaf(node) => node.write(page),
        }
    }

    /// Header of the node.
    #[must_use]
    pub const fn header_mut(&mut self) -> &mut NodeHeader {
        match self {
            Self::Internal(node) => &mut node.header,
            Self::Leaf(node) => &mut node.header,
        }
    }
}

/// An internal (non-leaf) B-tree node.
///
/// Stores N keys and N+1 child pointers.
/// `Child[i]` contains keys < `Key[i]`
/// `Child[i+1]` contains keys >= `Key[i]`
#[derive(Debug)]
pub struct InternalNode {
    pub header: NodeHeader,
    /// Keys in sorted order.
    pub keys: Vec<CompositeKey>,
    /// Child page pointers. `children.len()` == `keys.len()` + 1
    pub children: Vec<PageIndex>,
}

impl InternalNode {
    /// Create an internal node with initial children.
    #[must_use]
    pub fn with_children(
        parent_page: PageIndex,
        left_child: PageIndex,
        key: CompositeKey,
        right_child: PageIndex,
    ) -> Self {
        Self {
            header: NodeHeader::new(NodeType::Internal, parent_page),
            keys: vec![key],
            children: vec![left_child, right_child],
        }
    }

    /// Read an internal node from a page.
    pub fn read(page: &impl PageRead) -> Result<Self, NodeError> {
        let header = NodeHeader::read(page)?;
        if header.node_type != NodeType::Internal {
            return Err(NodeError::WrongNodeType);
        }

        let key_count = usize::from(header.key_count);
        if key_count > max_internal_keys(page.page_size()) {
            return Err(NodeError::InvalidHeader);
        }
        let mut keys = Vec::with_capacity(key_count);
        let mut children = Vec::with_capacity(key_count + 1);

        let mut offset = DATA_OFFSET;

        // Read first child pointer
        children.push(page.get_u64(offset));
        offset += 8;

        // Read key-child pairs
        for _ in 0..key_count {
            keys.push(CompositeKey::read_from(page, offset)?);
            offset += KEY_SIZE;

            children.push(page.get_u64(offset));
            offset += 8;
        }

        Ok(Self {
            header,
            keys,
            children,
        })
    }

    /// Write an internal node to a page.
    pub fn write(&self, page: &mut impl PageWrite) -> Result<(), NodeError> {
        if self.keys.len() > max_internal_keys(page.page_size()) {
            return Err(NodeError::NodeFull);
        }
        PageHeader::init(page, PageType::TreeInternal);

        let mut header = self.header;
        header.key_count = self.keys.len() as u16;
        header.write(page);

        // Serialize the body in one buffer so the page sees a single write.
        let mut body = Vec::with_capacity(8 + self.keys.len() * INTERNAL_ENTRY_SIZE);
        body.extend_from_slice(&self.children.first().copied().unwrap_or(0).to_le_bytes());
        for (i, key) in self.keys.iter().enumerate() {
            body.extend_from_slice(&key.to_bytes());
            let child = self.children.get(i + 1).copied().unwrap_or(0);
            body.extend_from_slice(&child.to_le_bytes());
        }
        page.set_bytes(DATA_OFFSET, &body);
        Ok(())
    }

    /// Find the child index for a given key.
    #[must_use]
    pub fn find_child_index(&self, key: &CompositeKey) -> usize {
        // Binary search for the first key >= target
        match self.keys.binary_search(key) {
            Ok(i) => i + 1, // Exact match, go right
            Err(i) => i,    // Insert position
        }
    }

    /// Check if the node holds more keys than a page can store.
    #[must_use]
    pub fn is_overfull(&self, page_size: usize) -> bool {
        self.keys.len() > max_internal_keys(page_size)
    }

    /// Insert a key and right child at the appropriate position.
    pub fn insert(&mut self, key: CompositeKey, right_child: PageIndex) {
        let idx = self.find_child_index(&key);
        self.keys.insert(idx, key);
        self.children.insert(idx + 1, right_child);
    }

    /// Split the node, returning the median key and the new right node.
    #[must_use]
    pub fn split(&mut self) -> (CompositeKey, Self) {
        let mid = self.keys.len() / 2;
        let median_key = self.keys[mid];

        // Right node gets keys and children after median
        let right_keys: Vec<CompositeKey> = self.keys.drain(mid + 1..).collect();
        let right_children: Vec<PageIndex> = self.children.drain(mid + 1..).collect();

        // Remove median key from left node
        self.keys.pop();

        let right_node = Self {
            header: NodeHeader {
                key_count: right_keys.len() as u16,
                ..NodeHeader::new(NodeType::Internal, self.header.parent_page)
            },
            keys: right_keys,
            children: right_children,
        };

        (median_key, right_node)
    }
}

/// A key-value entry in a leaf node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: CompositeKey,
    pub value: i32,
}

/// A leaf B-tree node.
///
/// Stores key-value pairs and links to sibling leaves.
#[derive(Debug)]
pub struct LeafNode {
    pub header: NodeHeader,
    /// Entries in sorted order by key.
    pub entries: Vec<LeafEntry>,
}

impl LeafNode {
    /// Create a new empty leaf node.
    #[must_use]
    pub const fn new(parent_page: PageIndex) -> Self {
        Self {
            header: NodeHeader::new(NodeType::Leaf, parent_page),
            entries: Vec::new(),
        }
    }

    /// Read a leaf node from a page.
    pub fn read(page: &impl PageRead) -> Result<Self, NodeError> {
        let header = NodeHeader::read(page)?;
        if header.node_type != NodeType::Leaf {
            return Err(NodeError::WrongNodeType);
        }

        let entry_count = usize::from(header.key_count);
        if entry_count > max_leaf_entries(page.page_size()) {
            return Err(NodeError::InvalidHeader);
        }
        let mut entries = Vec::with_capacity(entry_count);

        let mut offset = DATA_OFFSET;
        for _ in 0..entry_count {
            let key = CompositeKey::read_from(page, offset)?;
            let value = page.get_i32(offset + KEY_SIZE);
            entries.push(LeafEntry { key, value });
            offset += LEAF_ENTRY_SIZE;
        }

        Ok(Self { header, entries })
    }

    /// Write a leaf node to a page.
    pub fn write(&self, page: &mut impl PageWrite) -> Result<(), NodeError> {
        if self.entries.len() > max_leaf_entries(page.page_size()) {
            return Err(NodeError::NodeFull);
        }
        PageHeader::init(page, PageType::TreeLeaf);

        let mut header = self.header;
        header.key_count = self.entries.len() as u16;
        header.write(page);

        let mut body = Vec::with_capacity(self.entries.len() * LEAF_ENTRY_SIZE);
        for entry in &self.entries {
            body.extend_from_slice(&entry.key.to_bytes());
            body.extend_from_slice(&entry.value.to_le_bytes());
        }
        page.set_bytes(DATA_OFFSET, &body);
        Ok(())
    }

    /// Find the index where a key should be inserted (or exists).
    pub fn find_index(&self, key: &CompositeKey) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.key.cmp(key))
    }

    /// Get a value by key.
    #[must_use]
    pub fn get(&self, key: &CompositeKey) -> Option<i32> {
        self.find_index(key).ok().map(|i| self.entries[i].value)
    }

    /// Insert or update an entry.
    ///
    /// Returns the old value if updating, None if inserting.
    pub fn insert(&mut self, key: CompositeKey, value: i32) -> Option<i32> {
        match self.find_index(&key) {
            Ok(i) => Some(std::mem::replace(&mut self.entries[i].value, value)),
            Err(i) => {
                self.entries.insert(i, LeafEntry { key, value });
                None
            }
        }
    }

    /// Remove an entry by key.
    ///
    /// Returns the removed value if found.
    pub fn remove(&mut self, key: &CompositeKey) -> Option<i32> {
        self.find_index(key)
            .ok()
            .map(|i| self.entries.remove(i).value)
    }

    /// Check if the node holds more entries than a page can store.
    #[must_use]
    pub fn is_overfull(&self, page_size: usize) -> bool {
        self.entries.len() > max_leaf_entries(page_size)
    }

    /// Split the node, returning the split key and the new right node.
    #[must_use]
    pub fn split(&mut self) -> (CompositeKey, Self) {
        let mid = self.entries.len() / 2;

        // Right node gets entries from mid onwards
        let right_entries: Vec<LeafEntry> = self.entries.drain(mid..).collect();
        let split_key = right_entries[0].key;

        let right_node = Self {
            header: NodeHeader {
                key_count: right_entries.len() as u16,
                next_leaf: self.header.next_leaf,
                ..NodeHeader::new(NodeType::Leaf, self.header.parent_page)
            },
            entries: right_entries,
        };

        (split_key, right_node)
    }
}

/// Errors that can occur when working with B-tree nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Invalid node header.
    InvalidHeader,
    /// Wrong node type for operation.
    WrongNodeType,
    /// Node has more entries than fit in a page.
    NodeFull,
    /// Page header did not match a tree node.
    Page(PageError),
    /// Key could not be decoded.
    Key(KeyError),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidHeader => write!(f, "invalid node header"),
            Self::WrongNodeType => write!(f, "wrong node type for operation"),
            Self::NodeFull => write!(f, "node is full"),
            Self::Page(e) => write!(f, "page error: {e}"),
            Self::Key(e) => write!(f, "key error: {e}"),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Page(e) => Some(e),
            Self::Key(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PageError> for NodeError {
    fn from(e: PageError) -> Self {
        Self::Page(e)
    }
}

impl From<KeyError> for NodeError {
    fn from(e: KeyError) -> Self {
        Self::Key(e)
    }
}
