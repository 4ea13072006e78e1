//! Page cache over a directory of paged data files.
//!
//! The cache owns every open [`PagedFile`], the persisted [`FileRegistry`]
//! and the committed image of every page read so far. Committed pages are
//! shared as `Arc<Page>`; they are replaced wholesale when an atomic
//! operation commits, never mutated in place. Resident pages are not evicted.
//!
//! # Lock ordering
//!
//! `registry` → `files` → `CachedFile::file` → `CachedFile::pages`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::storage::buffer_pool::BufferPool;
use crate::storage::error::StorageError;
use crate::storage::file::PagedFile;
use crate::storage::page::{Page, PageIndex};
use crate::storage::registry::FileRegistry;

/// Identifier of a data file, stable across restarts.
pub type FileId = u32;

/// File id that never names a file.
pub const INVALID_FILE_ID: FileId = u32::MAX;

struct CachedFile {
    name: String,
    file: Mutex<PagedFile>,
    pages: RwLock<HashMap<PageIndex, Arc<Page>>>,
}

/// Shared cache of committed pages.
pub struct PageCache {
    directory: PathBuf,
    page_size: usize,
    pool: Arc<BufferPool>,
    registry: Mutex<FileRegistry>,
    files: RwLock<HashMap<FileId, Arc<CachedFile>>>,
}

impl PageCache {
    /// Open the cache over `directory`, creating the directory if needed and
    /// opening every registered file.
    pub fn open(
        directory: &Path,
        page_size: usize,
        pool_pages: usize,
    ) -> Result<Arc<Self>, StorageError> {
        std::fs::create_dir_all(directory)?;
        let registry = FileRegistry::load_or_create(directory)?;

        let mut files = HashMap::new();
        for (id, name) in registry.iter() {
            let path = directory.join(name);
            if !path.exists() {
                return Err(StorageError::Corruption(format!(
                    "registered file {name} (id {id}) is missing"
                )));
            }
            let file = PagedFile::open(&path, page_size)?;
            files.insert(
                id,
                Arc::new(CachedFile {
                    name: name.to_string(),
                    file: Mutex::new(file),
                    pages: RwLock::new(HashMap::new()),
                }),
            );
        }

        info!(
            directory = %directory.display(),
            page_size,
            files = files.len(),
            "Opened page cache"
        );

        Ok(Arc::new(Self {
            directory: directory.to_path_buf(),
            page_size,
            pool: BufferPool::new(page_size, pool_pages),
            registry: Mutex::new(registry),
            files: RwLock::new(files),
        }))
    }

    /// Page size used by every file.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// The pool page buffers are leased from.
    #[must_use]
    pub const fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Directory holding the data files.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Reserve a file id for a file that will be created later.
    pub fn reserve_file_id(&self) -> Result<FileId, StorageError> {
        let mut registry = self
            .registry
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(registry.reserve_id())
    }

    /// Create a new empty file.
    pub fn create_file(&self, name: &str) -> Result<FileId, StorageError> {
        let id = self.reserve_file_id()?;
        self.create_file_with_id(id, name)?;
        Ok(id)
    }

    /// Create a new empty file under a previously reserved id.
    pub fn create_file_with_id(&self, id: FileId, name: &str) -> Result<(), StorageError> {
        let mut registry = self
            .registry
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        if registry.id_of(name).is_some() {
            return Err(StorageError::FileExists(name.to_string()));
        }

        let path = self.directory.join(name);
        if path.exists() {
            // Left behind by a crash between file creation and registration.
            warn!(file = name, "Removing unregistered data file");
            std::fs::remove_file(&path)?;
        }
        let file = PagedFile::create(&path, self.page_size)?;
        registry.insert(id, name)?;

        let mut files = self.files.write().map_err(|_| StorageError::LockPoisoned)?;
        files.insert(
            id,
            Arc::new(CachedFile {
                name: name.to_string(),
                file: Mutex::new(file),
                pages: RwLock::new(HashMap::new()),
            }),
        );

        debug!(file_id = id, file = name, "Created data file");
        Ok(())
    }

    /// Look up an existing file by name.
    pub fn open_file(&self, name: &str) -> Result<FileId, StorageError> {
        self.file_id(name)?
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))
    }

    /// Whether a file with this name exists.
    pub fn file_exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.file_id(name)?.is_some())
    }

    /// Id of the file with this name, if any.
    pub fn file_id(&self, name: &str) -> Result<Option<FileId>, StorageError> {
        let registry = self
            .registry
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(registry.id_of(name))
    }

    /// Name of the file with this id.
    pub fn file_name(&self, id: FileId) -> Result<String, StorageError> {
        Ok(self.cached(id)?.name.clone())
    }

    /// Every open file, in id order.
    pub fn file_names(&self) -> Result<Vec<(FileId, String)>, StorageError> {
        let registry = self
            .registry
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(registry
            .iter()
            .map(|(id, name)| (id, name.to_string()))
            .collect())
    }

    /// Delete a file and drop its cached pages.
    pub fn delete_file(&self, id: FileId) -> Result<(), StorageError> {
        let mut registry = self
            .registry
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        let removed = self
            .files
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(&id)
            .ok_or(StorageError::UnknownFile(id))?;
        registry.remove(id)?;

        let path = {
            let file = removed.file.lock().map_err(|_| StorageError::LockPoisoned)?;
            file.path().to_path_buf()
        };
        std::fs::remove_file(&path)?;

        debug!(file_id = id, file = %removed.name, "Deleted data file");
        Ok(())
    }

    /// Number of committed pages in a file.
    pub fn page_count(&self, id: FileId) -> Result<u64, StorageError> {
        let cached = self.cached(id)?;
        let file = cached.file.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(file.page_count())
    }

    /// Committed image of a page, read from disk on first access.
    pub fn load_page(&self, id: FileId, page_index: PageIndex) -> Result<Arc<Page>, StorageError> {
        let cached = self.cached(id)?;

        if let Some(page) = cached
            .pages
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(&page_index)
        {
            return Ok(Arc::clone(page));
        }

        let mut file = cached.file.lock().map_err(|_| StorageError::LockPoisoned)?;
        let mut pages = cached
            .pages
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        // Another reader may have loaded it while we waited
        if let Some(page) = pages.get(&page_index) {
            return Ok(Arc::clone(page));
        }

        let page_count = file.page_count();
        if page_index >= page_count {
            return Err(StorageError::PageOutOfBounds {
                file_id: id,
                page_index,
                page_count,
            });
        }

        let mut page = self.pool.page_zeroed();
        file.read_page(page_index, &mut page)?;
        page.verify().map_err(|e| {
            StorageError::Corruption(format!("{} page {page_index}: {e}", cached.name))
        })?;

        let page = Arc::new(page);
        pages.insert(page_index, Arc::clone(&page));
        Ok(page)
    }

    /// Read a page from disk bypassing checksum validation.
    ///
    /// Used by recovery, which overwrites the page from the log anyway.
    pub(crate) fn load_page_unchecked(
        &self,
        id: FileId,
        page_index: PageIndex,
    ) -> Result<Page, StorageError> {
        let cached = self.cached(id)?;
        let mut file = cached.file.lock().map_err(|_| StorageError::LockPoisoned)?;
        let mut page = self.pool.page_zeroed();
        if page_index < file.page_count() {
            file.read_page(page_index, &mut page)?;
        }
        Ok(page)
    }

    /// Replace the committed image of a page, writing it through to disk.
    ///
    /// Writing past the end of the file extends it.
    pub fn install_page(
        &self,
        id: FileId,
        page_index: PageIndex,
        mut page: Page,
    ) -> Result<(), StorageError> {
        let cached = self.cached(id)?;
        page.seal();

        let mut file = cached.file.lock().map_err(|_| StorageError::LockPoisoned)?;
        file.write_page(page_index, &page)?;
        cached
            .pages
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(page_index, Arc::new(page));
        Ok(())
    }

    /// Sync one file to disk.
    pub fn sync(&self, id: FileId) -> Result<(), StorageError> {
        let cached = self.cached(id)?;
        let file = cached.file.lock().map_err(|_| StorageError::LockPoisoned)?;
        file.sync()?;
        Ok(())
    }

    /// Sync every open file to disk.
    pub fn sync_all(&self) -> Result<(), StorageError> {
        let ids: Vec<FileId> = self
            .files
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .keys()
            .copied()
            .collect();
        for id in ids {
            self.sync(id)?;
        }
        Ok(())
    }

    /// Sync and drop every resident page.
    pub fn close(&self) -> Result<(), StorageError> {
        self.sync_all()?;
        let files = self.files.read().map_err(|_| StorageError::LockPoisoned)?;
        for cached in files.values() {
            cached
                .pages
                .write()
                .map_err(|_| StorageError::LockPoisoned)?
                .clear();
        }
        info!(directory = %self.directory.display(), "Closed page cache");
        Ok(())
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    fn cached(&self, id: FileId) -> Result<Arc<CachedFile>, StorageError> {
        self.files
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(&id)
            .map(Arc::clone)
            .ok_or(StorageError::UnknownFile(id))
    }
}
