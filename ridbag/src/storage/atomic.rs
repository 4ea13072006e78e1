//! Atomic operations: the durability boundary for page writes.
//!
//! Every structural change (tree put/remove, size-map slot changes, file
//! creation and deletion) runs inside an [`AtomicOperation`]. Writes go to a
//! per-page [`PageChanges`] diff; nothing reaches the cache until commit.
//!
//! # Commit
//!
//! 1. Append FILE_DELETED, FILE_CREATED and PAGE_UPDATE records, then COMMIT
//! 2. Sync the WAL
//! 3. Under the exclusive commit lock, delete files, create files, install pages
//! 4. Sync the touched data files
//! 5. Truncate the WAL
//!
//! A crash before step 2 completes leaves no trace; a crash after it is
//! redone by recovery on the next open. If step 1 or 2 fails, the log is cut
//! back and the operation rolls back. If step 3 or 4 fails, the manager is
//! marked broken: every later operation and read view fails with
//! [`StorageError::RecoveryRequired`] and the WAL keeps its records until the
//! store is reopened.
//!
//! # Concurrency
//!
//! One atomic operation runs at a time (writer mutex). Readers use a
//! [`ReadView`], which holds the commit lock shared so it never observes half
//! of a commit. Do not start an atomic operation while holding a read view on
//! the same thread.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};

use tracing::{debug, debug_span, error, info};

use crate::storage::cache::{FileId, PageCache};
use crate::storage::changes::PageChanges;
use crate::storage::error::StorageError;
use crate::storage::page::{Page, PageIndex, PageRead, PageWrite};
use crate::storage::recovery::{self, RecoveryResult};
use crate::storage::wal::{
    LogRecord, LogRecordPayload, OperationId, PageRange, WAL_FILE_NAME, Wal,
};

/// Errors that can carry the name of the component and operation that failed.
pub trait ComponentError: From<StorageError> {
    #[must_use]
    fn with_component_context(self, component: &str, operation: &'static str) -> Self;
}

impl ComponentError for StorageError {
    fn with_component_context(self, component: &str, operation: &'static str) -> Self {
        self.in_component(component, operation)
    }
}

/// Read access to pages, committed or as seen by an in-flight operation.
pub trait PageAccess {
    /// Pin a page for reading.
    fn load_page_for_read(
        &self,
        file_id: FileId,
        page_index: PageIndex,
    ) -> Result<PageReadGuard<'_>, StorageError>;

    /// Number of pages in a file.
    fn page_count(&self, file_id: FileId) -> Result<u64, StorageError>;

    /// Page size in bytes.
    fn page_size(&self) -> usize;
}

/// A page pinned for reading.
pub enum PageReadGuard<'a> {
    /// Committed image shared with the cache.
    Committed(Arc<Page>),
    /// Image with the current operation's uncommitted changes.
    Changed(&'a PageChanges),
}

impl PageRead for PageReadGuard<'_> {
    fn page_size(&self) -> usize {
        match self {
            Self::Committed(page) => page.page_size(),
            Self::Changed(changes) => changes.page_size(),
        }
    }

    fn copy_bytes(&self, offset: usize, buf: &mut [u8]) {
        match self {
            Self::Committed(page) => page.copy_bytes(offset, buf),
            Self::Changed(changes) => changes.copy_bytes(offset, buf),
        }
    }
}

/// A page pinned for writing inside an atomic operation.
pub struct PageWriteGuard<'a> {
    file_id: FileId,
    page_index: PageIndex,
    changes: &'a mut PageChanges,
}

impl PageWriteGuard<'_> {
    /// File the page belongs to.
    #[must_use]
    pub const fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Index of the page within its file.
    #[must_use]
    pub const fn page_index(&self) -> PageIndex {
        self.page_index
    }
}

impl PageRead for PageWriteGuard<'_> {
    fn page_size(&self) -> usize {
        self.changes.page_size()
    }

    fn copy_bytes(&self, offset: usize, buf: &mut [u8]) {
        self.changes.copy_bytes(offset, buf);
    }
}

impl PageWrite for PageWriteGuard<'_> {
    fn set_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.changes.set_bytes(offset, bytes);
    }
}

/// Serializes atomic operations and commits them through the WAL.
pub struct AtomicOperationsManager {
    cache: Arc<PageCache>,
    wal: Mutex<Wal>,
    writer: Mutex<()>,
    commit_lock: RwLock<()>,
    next_operation_id: AtomicU64,
    sync_on_commit: bool,
    /// Set when a durable operation could not be installed.
    broken: AtomicBool,
    /// Stop commits right after the WAL sync, as if the process died.
    #[cfg(test)]
    crash_before_install: AtomicBool,
}

impl AtomicOperationsManager {
    /// Open the WAL in the cache directory, replay it, and return the manager.
    pub fn open(
        cache: Arc<PageCache>,
        sync_on_commit: bool,
    ) -> Result<Arc<Self>, StorageError> {
        let mut wal = Wal::open(&cache.directory().join(WAL_FILE_NAME), sync_on_commit)?;
        let result = recovery::recover(&cache, &mut wal)?;
        log_recovery(&result);

        Ok(Arc::new(Self {
            cache,
            wal: Mutex::new(wal),
            writer: Mutex::new(()),
            commit_lock: RwLock::new(()),
            next_operation_id: AtomicU64::new(1),
            sync_on_commit,
            broken: AtomicBool::new(false),
            #[cfg(test)]
            crash_before_install: AtomicBool::new(false),
        }))
    }

    /// The underlying page cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// Run `f` in an atomic operation, committing on `Ok` and rolling back on `Err`.
    pub fn execute_inside_atomic_operation<'m, E, F>(&'m self, f: F) -> Result<(), E>
    where
        E: From<StorageError>,
        F: FnOnce(&mut AtomicOperation<'m>) -> Result<(), E>,
    {
        self.calculate_inside_atomic_operation(f)
    }

    /// Value-returning form of [`Self::execute_inside_atomic_operation`].
    pub fn calculate_inside_atomic_operation<'m, T, E, F>(&'m self, f: F) -> Result<T, E>
    where
        E: From<StorageError>,
        F: FnOnce(&mut AtomicOperation<'m>) -> Result<T, E>,
    {
        let mut operation = self.start()?;
        match f(&mut operation) {
            Ok(value) => {
                operation.commit()?;
                Ok(value)
            }
            Err(e) => {
                operation.rollback();
                Err(e)
            }
        }
    }

    /// A consistent view of committed pages.
    pub fn read_view(&self) -> Result<ReadView<'_>, StorageError> {
        self.check_usable()?;
        let guard = self
            .commit_lock
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(ReadView {
            cache: &self.cache,
            _commit: guard,
        })
    }

    /// Make every later commit stop once its records are durable in the WAL.
    /// The store must be dropped and reopened afterwards.
    #[cfg(test)]
    pub(crate) fn simulate_crash_before_install(&self) {
        self.crash_before_install.store(true, Ordering::SeqCst);
    }

    /// Whether a committed operation failed to install. Only reopening the
    /// store clears this.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn check_usable(&self) -> Result<(), StorageError> {
        if self.is_broken() {
            return Err(StorageError::RecoveryRequired);
        }
        Ok(())
    }

    fn mark_broken(&self) {
        if !self.broken.swap(true, Ordering::SeqCst) {
            error!("Storage needs recovery; refusing further operations until reopened");
        }
    }

    fn start(&self) -> Result<AtomicOperation<'_>, StorageError> {
        let writer = self.writer.lock().map_err(|_| StorageError::LockPoisoned)?;
        // Checked under the writer lock so no operation starts after a failed install
        self.check_usable()?;
        let id = self.next_operation_id.fetch_add(1, Ordering::Relaxed);
        Ok(AtomicOperation {
            manager: self,
            _writer: writer,
            id,
            pages: BTreeMap::new(),
            appended: BTreeSet::new(),
            page_counts: HashMap::new(),
            created: Vec::new(),
            deleted: BTreeSet::new(),
            rollback_hooks: Vec::new(),
        })
    }
}

fn log_recovery(result: &RecoveryResult) {
    if result.records_scanned > 0 || result.torn_tail {
        info!(
            records_scanned = result.records_scanned,
            operations_replayed = result.operations_replayed,
            operations_discarded = result.operations_discarded,
            pages_restored = result.pages_restored,
            torn_tail = result.torn_tail,
            "WAL recovery complete"
        );
    }
}

/// Committed pages under the shared commit lock.
pub struct ReadView<'a> {
    cache: &'a PageCache,
    _commit: RwLockReadGuard<'a, ()>,
}

impl PageAccess for ReadView<'_> {
    fn load_page_for_read(
        &self,
        file_id: FileId,
        page_index: PageIndex,
    ) -> Result<PageReadGuard<'_>, StorageError> {
        Ok(PageReadGuard::Committed(
            self.cache.load_page(file_id, page_index)?,
        ))
    }

    fn page_count(&self, file_id: FileId) -> Result<u64, StorageError> {
        self.cache.page_count(file_id)
    }

    fn page_size(&self) -> usize {
        self.cache.page_size()
    }
}

/// One in-flight atomic operation.
pub struct AtomicOperation<'a> {
    manager: &'a AtomicOperationsManager,
    _writer: MutexGuard<'a, ()>,
    id: OperationId,
    pages: BTreeMap<(FileId, PageIndex), PageChanges>,
    /// Pages appended by this operation.
    appended: BTreeSet<(FileId, PageIndex)>,
    /// Page counts of files this operation appended to or created.
    page_counts: HashMap<FileId, u64>,
    /// Files created by this operation (created on disk at commit).
    created: Vec<(FileId, String)>,
    deleted: BTreeSet<FileId>,
    rollback_hooks: Vec<Box<dyn FnOnce() + 'a>>,
}

impl<'a> AtomicOperation<'a> {
    /// Identifier of this operation in the WAL.
    #[must_use]
    pub const fn id(&self) -> OperationId {
        self.id
    }

    /// The underlying page cache.
    #[must_use]
    pub fn cache(&self) -> &PageCache {
        &self.manager.cache
    }

    /// Create a file. It becomes visible to others at commit.
    pub fn add_file(&mut self, name: &str) -> Result<FileId, StorageError> {
        if self.file_exists(name)? {
            return Err(StorageError::FileExists(name.to_string()));
        }
        let id = self.cache().reserve_file_id()?;
        self.created.push((id, name.to_string()));
        self.page_counts.insert(id, 0);
        debug!(operation = self.id, file_id = id, file = name, "Added file");
        Ok(id)
    }

    /// Id of an existing file, including files created by this operation.
    pub fn open_file(&self, name: &str) -> Result<FileId, StorageError> {
        if let Some((id, _)) = self.created.iter().find(|(_, n)| n == name) {
            return Ok(*id);
        }
        let id = self.cache().open_file(name)?;
        if self.deleted.contains(&id) {
            return Err(StorageError::FileNotFound(name.to_string()));
        }
        Ok(id)
    }

    /// Whether a file with this name exists as seen by this operation.
    pub fn file_exists(&self, name: &str) -> Result<bool, StorageError> {
        if self.created.iter().any(|(_, n)| n == name) {
            return Ok(true);
        }
        Ok(self
            .cache()
            .file_id(name)?
            .is_some_and(|id| !self.deleted.contains(&id)))
    }

    /// Delete a file. The deletion happens at commit.
    pub fn delete_file(&mut self, file_id: FileId) -> Result<(), StorageError> {
        self.check_file(file_id)?;
        self.pages.retain(|(id, _), _| *id != file_id);
        self.appended.retain(|(id, _)| *id != file_id);
        self.page_counts.remove(&file_id);

        if let Some(pos) = self.created.iter().position(|(id, _)| *id == file_id) {
            // Never reached the disk
            self.created.remove(pos);
        } else {
            self.deleted.insert(file_id);
        }
        debug!(operation = self.id, file_id, "Deleted file");
        Ok(())
    }

    /// Append a zeroed page to a file and pin it for writing.
    pub fn add_page(&mut self, file_id: FileId) -> Result<PageWriteGuard<'_>, StorageError> {
        let page_index = self.page_count(file_id)?;
        let base = Arc::new(self.manager.cache.pool().page_zeroed());

        self.page_counts.insert(file_id, page_index + 1);
        self.appended.insert((file_id, page_index));
        let changes = self
            .pages
            .entry((file_id, page_index))
            .or_insert_with(|| PageChanges::new(base));

        Ok(PageWriteGuard {
            file_id,
            page_index,
            changes,
        })
    }

    /// Pin an existing page for writing.
    pub fn load_page_for_write(
        &mut self,
        file_id: FileId,
        page_index: PageIndex,
    ) -> Result<PageWriteGuard<'_>, StorageError> {
        self.check_bounds(file_id, page_index)?;

        if !self.pages.contains_key(&(file_id, page_index)) {
            let base = self.manager.cache.load_page(file_id, page_index)?;
            self.pages
                .insert((file_id, page_index), PageChanges::new(base));
        }
        let changes = self
            .pages
            .get_mut(&(file_id, page_index))
            .ok_or(StorageError::UnknownFile(file_id))?;

        Ok(PageWriteGuard {
            file_id,
            page_index,
            changes,
        })
    }

    /// Register a callback that runs if this operation rolls back.
    ///
    /// Used to undo in-memory registrations made on behalf of the operation.
    pub fn on_rollback(&mut self, hook: impl FnOnce() + 'a) {
        self.rollback_hooks.push(Box::new(hook));
    }

    /// Run a component's operation with a tracing span, attaching the
    /// component and operation name to any error.
    pub fn calculate_inside_component_operation<T, E, F>(
        &mut self,
        component: &str,
        operation: &'static str,
        f: F,
    ) -> Result<T, E>
    where
        E: ComponentError,
        F: FnOnce(&mut Self) -> Result<T, E>,
    {
        let span = debug_span!("component_operation", component, operation, op = self.id);
        let _enter = span.enter();
        f(self).map_err(|e| e.with_component_context(component, operation))
    }

    fn check_file(&self, file_id: FileId) -> Result<(), StorageError> {
        if self.deleted.contains(&file_id) {
            return Err(StorageError::UnknownFile(file_id));
        }
        if self.page_counts.contains_key(&file_id) {
            return Ok(());
        }
        self.manager.cache.page_count(file_id).map(|_| ())
    }

    fn check_bounds(&self, file_id: FileId, page_index: PageIndex) -> Result<(), StorageError> {
        let page_count = self.page_count(file_id)?;
        if page_index >= page_count {
            return Err(StorageError::PageOutOfBounds {
                file_id,
                page_index,
                page_count,
            });
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.deleted.is_empty()
            && self.appended.is_empty()
            && self.pages.values().all(PageChanges::is_empty)
    }

    fn log_records(&self) -> Vec<LogRecord> {
        let mut records = Vec::new();
        for file_id in &self.deleted {
            records.push(LogRecord::new(
                self.id,
                LogRecordPayload::FileDeleted { file_id: *file_id },
            ));
        }
        for (file_id, name) in &self.created {
            records.push(LogRecord::new(
                self.id,
                LogRecordPayload::FileCreated {
                    file_id: *file_id,
                    name: name.clone(),
                },
            ));
        }
        for ((file_id, page_index), changes) in &self.pages {
            if changes.is_empty() && !self.appended.contains(&(*file_id, *page_index)) {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)] // offsets are below MAX_PAGE_SIZE
            let ranges = changes
                .ranges()
                .map(|(offset, bytes)| PageRange {
                    offset: offset as u32,
                    bytes: bytes.to_vec(),
                })
                .collect();
            records.push(LogRecord::new(
                self.id,
                LogRecordPayload::PageUpdate {
                    file_id: *file_id,
                    page_index: *page_index,
                    ranges,
                },
            ));
        }
        records.push(LogRecord::new(self.id, LogRecordPayload::Commit));
        records
    }

    fn commit(mut self) -> Result<(), StorageError> {
        if self.is_empty() {
            return Ok(());
        }

        let manager = self.manager;
        let records = self.log_records();
        let Ok(mut wal) = manager.wal.lock() else {
            self.run_rollback_hooks();
            return Err(StorageError::LockPoisoned);
        };
        let start = match wal.end_offset() {
            Ok(start) => start,
            Err(e) => {
                drop(wal);
                self.run_rollback_hooks();
                return Err(e.into());
            }
        };

        if let Err(e) = wal.append(&records).and_then(|()| wal.sync()) {
            // Records left in the log would be replayed on the next open
            if let Err(cut) = wal.truncate_to(start) {
                error!(operation = self.id, error = %cut, "Failed to cut back the WAL");
                manager.mark_broken();
            }
            drop(wal);
            self.run_rollback_hooks();
            return Err(e.into());
        }

        #[cfg(test)]
        if manager.crash_before_install.load(Ordering::SeqCst) {
            return Ok(());
        }

        // The operation is durable from here on. A failed install leaves the
        // cache partly updated, so nothing may read or commit until recovery
        // has replayed the WAL on the next open.
        if let Err(e) = self.install(manager) {
            error!(operation = self.id, error = %e, "Failed to install committed operation");
            manager.mark_broken();
            drop(wal);
            self.run_rollback_hooks();
            return Err(e);
        }

        if let Err(e) = wal.truncate() {
            // Installed, but the records must not be replayed under a later
            // operation's changes.
            error!(operation = self.id, error = %e, "Failed to truncate WAL");
            manager.mark_broken();
        }
        debug!(
            operation = self.id,
            pages = self.pages.len(),
            created = self.created.len(),
            deleted = self.deleted.len(),
            "Committed atomic operation"
        );
        Ok(())
    }

    fn install(&self, manager: &AtomicOperationsManager) -> Result<(), StorageError> {
        let cache = &manager.cache;
        {
            let _commit = manager
                .commit_lock
                .write()
                .map_err(|_| StorageError::LockPoisoned)?;

            // Deletions first, so a name dropped and created again is free
            for file_id in &self.deleted {
                cache.delete_file(*file_id)?;
            }
            for (file_id, name) in &self.created {
                cache.create_file_with_id(*file_id, name)?;
            }
            for ((file_id, page_index), changes) in &self.pages {
                if changes.is_empty() && !self.appended.contains(&(*file_id, *page_index)) {
                    continue;
                }
                cache.install_page(*file_id, *page_index, changes.materialize(cache.pool()))?;
            }
        }

        if manager.sync_on_commit {
            let touched: BTreeSet<FileId> = self
                .pages
                .keys()
                .map(|(file_id, _)| *file_id)
                .chain(self.created.iter().map(|(file_id, _)| *file_id))
                .collect();
            for file_id in touched {
                cache.sync(file_id)?;
            }
        }
        Ok(())
    }

    fn rollback(mut self) {
        debug!(
            operation = self.id,
            pages = self.pages.len(),
            "Rolled back atomic operation"
        );
        self.run_rollback_hooks();
    }

    fn run_rollback_hooks(&mut self) {
        while let Some(hook) = self.rollback_hooks.pop() {
            hook();
        }
    }
}

impl PageAccess for AtomicOperation<'_> {
    fn load_page_for_read(
        &self,
        file_id: FileId,
        page_index: PageIndex,
    ) -> Result<PageReadGuard<'_>, StorageError> {
        self.check_bounds(file_id, page_index)?;
        if let Some(changes) = self.pages.get(&(file_id, page_index)) {
            return Ok(PageReadGuard::Changed(changes));
        }
        Ok(PageReadGuard::Committed(
            self.manager.cache.load_page(file_id, page_index)?,
        ))
    }

    fn page_count(&self, file_id: FileId) -> Result<u64, StorageError> {
        self.check_file(file_id)?;
        match self.page_counts.get(&file_id) {
            Some(count) => Ok(*count),
            None => self.manager.cache.page_count(file_id),
        }
    }

    fn page_size(&self) -> usize {
        self.manager.cache.page_size()
    }
}
