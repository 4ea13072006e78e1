//! Persisted map of file names to file ids.
//!
//! File ids are handed out once and stored in collection pointers, so they
//! must resolve to the same file after a restart. The map is a small binary
//! file rewritten in full (temp file + rename) on every change:
//!
//! ```text
//! +---------+-------+------------------------------------+-------+
//! | next_id | count | count x (id u32, len u16, name)    | crc32 |
//! +---------+-------+------------------------------------+-------+
//! ```

// name lengths are bounded by MAX_NAME_LEN, counts by u32 file ids
#![allow(clippy::cast_possible_truncation)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::storage::cache::FileId;
use crate::storage::error::StorageError;

/// Name of the registry file inside the data directory.
pub const REGISTRY_FILE_NAME: &str = "files.map";

/// Longest file name the registry accepts.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Name ↔ id map for every data file in a directory.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    next_id: FileId,
    files: BTreeMap<FileId, String>,
}

impl FileRegistry {
    /// Load the registry from `directory`, or start an empty one.
    pub fn load_or_create(directory: &Path) -> Result<Self, StorageError> {
        let path = directory.join(REGISTRY_FILE_NAME);
        if !path.exists() {
            return Ok(Self {
                path,
                next_id: 0,
                files: BTreeMap::new(),
            });
        }

        let bytes = fs::read(&path)?;
        let (next_id, files) = decode(&bytes)?;
        Ok(Self {
            path,
            next_id,
            files,
        })
    }

    /// Reserve a fresh id without registering a file under it.
    ///
    /// Reserved ids that never get registered are simply skipped.
    pub const fn reserve_id(&mut self) -> FileId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Register `name` under `id` and persist the map.
    pub fn insert(&mut self, id: FileId, name: &str) -> Result<(), StorageError> {
        if name.len() > MAX_NAME_LEN {
            return Err(StorageError::Corruption(format!(
                "file name too long: {} bytes",
                name.len()
            )));
        }
        self.files.insert(id, name.to_string());
        self.next_id = self.next_id.max(id + 1);
        self.persist()
    }

    /// Unregister `id` and persist the map.
    pub fn remove(&mut self, id: FileId) -> Result<Option<String>, StorageError> {
        let removed = self.files.remove(&id);
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Id registered for `name`.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<FileId> {
        self.files
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id)
    }

    /// All registered files in id order.
    pub fn iter(&self) -> impl Iterator<Item = (FileId, &str)> {
        self.files.iter().map(|(id, name)| (*id, name.as_str()))
    }

    fn persist(&self) -> Result<(), StorageError> {
        let bytes = encode(self.next_id, &self.files);
        let tmp_path = self.path.with_extension("map.tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            tmp.write_all(&bytes)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn encode(next_id: FileId, files: &BTreeMap<FileId, String>) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&next_id.to_le_bytes());
    bytes.extend_from_slice(&(files.len() as u32).to_le_bytes());
    for (id, name) in files {
        bytes.extend_from_slice(&id.to_le_bytes());
        bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(name.as_bytes());
    }
    let checksum = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&checksum.to_le_bytes());
    bytes
}

fn decode(bytes: &[u8]) -> Result<(FileId, BTreeMap<FileId, String>), StorageError> {
    let corrupt = |what: &str| StorageError::Corruption(format!("{REGISTRY_FILE_NAME}: {what}"));

    if bytes.len() < 12 {
        return Err(corrupt("truncated"));
    }
    let body = &bytes[..bytes.len() - 4];
    let stored = read_u32(bytes, bytes.len() - 4);
    if crc32fast::hash(body) != stored {
        return Err(corrupt("checksum mismatch"));
    }

    let next_id = read_u32(body, 0);
    let count = read_u32(body, 4);
    let mut files = BTreeMap::new();
    let mut offset = 8;
    for _ in 0..count {
        if offset + 6 > body.len() {
            return Err(corrupt("truncated entry"));
        }
        let id = read_u32(body, offset);
        let len = usize::from(u16::from_le_bytes([body[offset + 4], body[offset + 5]]));
        offset += 6;
        if offset + len > body.len() {
            return Err(corrupt("truncated name"));
        }
        let name = std::str::from_utf8(&body[offset..offset + len])
            .map_err(|_| corrupt("name is not UTF-8"))?;
        files.insert(id, name.to_string());
        offset += len;
    }

    Ok((next_id, files))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
