//! Per-collection element counters, stored apart from the shared tree.
//!
//! # File Layout
//!
//! - Page 0: [`EntryPoint`] holding the bucket count
//! - Pages 1..=bucket count: [`Bucket`]s of `max_bucket_size` counters
//!
//! # Slot Ids
//!
//! Local ids are zero-based within a bucket. A global id addresses bucket
//! page `global / max + 1` at local id `global % max`, the exact inverse of
//! `global = local + (page - 1) * max` used when the slot is allocated.

use tracing::debug;

use crate::sizemap::bucket::{Bucket, max_bucket_size};
use crate::sizemap::entry_point::EntryPoint;
use crate::sizemap::error::SizeMapError;
use crate::storage::{
    AtomicOperation, DurableComponent, FileId, INVALID_FILE_ID, PageAccess, PageCache, PageIndex,
};

/// File extension of size map files.
pub const SIZE_MAP_EXTENSION: &str = ".grs";

const ENTRY_POINT_PAGE: PageIndex = 0;

/// Counter slots in one paged file.
#[derive(Debug)]
pub struct SizeMap {
    component: DurableComponent,
}

impl SizeMap {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            component: DurableComponent::new(name, SIZE_MAP_EXTENSION),
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

    pub fn file_id(&self) -> Result<FileId, SizeMapError> {
        Ok(self.component.file_id()?)
    }

    /// Create the file with an empty entry point.
    pub fn create(&self, op: &mut AtomicOperation<'_>) -> Result<(), SizeMapError> {
        let mut state = self.component.exclusive()?;
        let file_name = self.component.file_name();

        let file_id = op.calculate_inside_component_operation(file_name, "create", |op| {
            let file_id = op.add_file(file_name)?;
            EntryPoint::init(op.add_page(file_id)?);
            Ok::<_, SizeMapError>(file_id)
        })?;

        state.file_id = file_id;
        debug!(size_map = file_name, file_id, "Created size map");
        Ok(())
    }

    /// Open the existing file. Returns false if there is none.
    pub fn load(&self, cache: &PageCache) -> Result<bool, SizeMapError> {
        let mut state = self.component.exclusive()?;
        let file_name = self.component.file_name();

        let Some(file_id) = cache
            .file_id(file_name)
            .map_err(|e| e.in_component(file_name, "load"))?
        else {
            return Ok(false);
        };
        state.file_id = file_id;
        debug!(size_map = file_name, file_id, "Loaded size map");
        Ok(true)
    }

    /// Delete the file when the operation commits.
    pub fn delete(&self, op: &mut AtomicOperation<'_>) -> Result<(), SizeMapError> {
        let state = self.component.exclusive()?;
        let file_id = checked(state.file_id, self.file_name())?;
        op.calculate_inside_component_operation(self.file_name(), "delete", |op| {
            op.delete_file(file_id)
        })?;
        debug!(size_map = self.file_name(), file_id, "Deleted size map");
        Ok(())
    }

    /// Allocate a new counter slot, initialized to zero.
    ///
    /// Fills the last bucket first; appends a bucket when it is full.
    pub fn add_tree(&self, op: &mut AtomicOperation<'_>) -> Result<u32, SizeMapError> {
        let state = self.component.exclusive()?;
        let file_id = checked(state.file_id, self.file_name())?;
        op.calculate_inside_component_operation(self.file_name(), "add_tree", |op| {
            allocate_slot(op, file_id)
        })
    }

    /// Add one to a slot's counter. Returns the new value.
    pub fn increment_size(
        &self,
        op: &mut AtomicOperation<'_>,
        id: u32,
    ) -> Result<i32, SizeMapError> {
        let state = self.component.exclusive()?;
        let file_id = checked(state.file_id, self.file_name())?;
        op.calculate_inside_component_operation(self.file_name(), "increment_size", |op| {
            let (page_index, local_id) = locate(op, file_id, id)?;
            let mut bucket = Bucket::open(op.load_page_for_write(file_id, page_index)?)?;
            bucket.increment_size(local_id).map_err(|e| e.with_slot(id))
        })
    }

    /// Subtract one from a slot's counter. Returns the new value.
    pub fn decrement_size(
        &self,
        op: &mut AtomicOperation<'_>,
        id: u32,
    ) -> Result<i32, SizeMapError> {
        let state = self.component.exclusive()?;
        let file_id = checked(state.file_id, self.file_name())?;
        op.calculate_inside_component_operation(self.file_name(), "decrement_size", |op| {
            let (page_index, local_id) = locate(op, file_id, id)?;
            let mut bucket = Bucket::open(op.load_page_for_write(file_id, page_index)?)?;
            bucket.decrement_size(local_id).map_err(|e| e.with_slot(id))
        })
    }

    /// Current value of a slot's counter.
    pub fn get_size(&self, access: &impl PageAccess, id: u32) -> Result<i32, SizeMapError> {
        let state = self.component.shared()?;
        let file_id = checked(state.file_id, self.file_name())?;

        let (page_index, local_id) = locate(access, file_id, id)?;
        let bucket = Bucket::open(access.load_page_for_read(file_id, page_index)?)?;
        bucket.get_size(local_id).map_err(|e| e.with_slot(id))
    }

    /// Mark a slot deleted.
    pub fn remove(&self, op: &mut AtomicOperation<'_>, id: u32) -> Result<(), SizeMapError> {
        let state = self.component.exclusive()?;
        let file_id = checked(state.file_id, self.file_name())?;
        op.calculate_inside_component_operation(self.file_name(), "remove", |op| {
            let (page_index, local_id) = locate(op, file_id, id)?;
            let mut bucket = Bucket::open(op.load_page_for_write(file_id, page_index)?)?;
            bucket.delete(local_id).map_err(|e| e.with_slot(id))
        })
    }

    /// Number of bucket pages.
    pub fn bucket_count(&self, access: &impl PageAccess) -> Result<u32, SizeMapError> {
        let state = self.component.shared()?;
        let file_id = checked(state.file_id, self.file_name())?;
        read_file_size(access, file_id)
    }

    /// Slots per bucket page.
    #[must_use]
    pub fn max_bucket_size(&self, access: &impl PageAccess) -> u32 {
        max_bucket_size(access.page_size())
    }
}

fn checked(file_id: FileId, file_name: &str) -> Result<FileId, SizeMapError> {
    if file_id == INVALID_FILE_ID {
        return Err(SizeMapError::NotLoaded(file_name.to_string()));
    }
    Ok(file_id)
}

fn read_file_size(access: &impl PageAccess, file_id: FileId) -> Result<u32, SizeMapError> {
    EntryPoint::open(access.load_page_for_read(file_id, ENTRY_POINT_PAGE)?)?.file_size()
}

fn allocate_slot(op: &mut AtomicOperation<'_>, file_id: FileId) -> Result<u32, SizeMapError> {
    let max = max_bucket_size(op.page_size());
    let mut file_size = read_file_size(op, file_id)?;
    if file_size == 0 {
        file_size = append_bucket(op, file_id, file_size)?;
    }

    loop {
        let added =
            Bucket::open(op.load_page_for_write(file_id, u64::from(file_size))?)?.add_entry()?;
        if let Some(local_id) = added {
            return global_id(local_id, file_size, max);
        }
        file_size = append_bucket(op, file_id, file_size)?;
    }
}

/// Append an empty bucket and record it in the entry point.
fn append_bucket(
    op: &mut AtomicOperation<'_>,
    file_id: FileId,
    file_size: u32,
) -> Result<u32, SizeMapError> {
    let new_size = file_size
        .checked_add(1)
        .ok_or(SizeMapError::SlotSpaceExhausted)?;

    let page = op.add_page(file_id)?;
    if page.page_index() != u64::from(new_size) {
        return Err(SizeMapError::Corrupt(format!(
            "bucket {new_size} landed on page {}",
            page.page_index()
        )));
    }
    Bucket::init(page);

    EntryPoint::open(op.load_page_for_write(file_id, ENTRY_POINT_PAGE)?)?
        .set_file_size(new_size)?;
    debug!(file_id, buckets = new_size, "Allocated size map bucket");
    Ok(new_size)
}

fn global_id(local_id: u32, bucket_page: u32, max: u32) -> Result<u32, SizeMapError> {
    (bucket_page - 1)
        .checked_mul(max)
        .and_then(|base| base.checked_add(local_id))
        .ok_or(SizeMapError::SlotSpaceExhausted)
}

/// Bucket page and local id of a global slot id.
fn split_id(id: u32, max: u32) -> (PageIndex, u32) {
    (PageIndex::from(id / max) + 1, id % max)
}

fn locate(
    access: &impl PageAccess,
    file_id: FileId,
    id: u32,
) -> Result<(PageIndex, u32), SizeMapError> {
    let (page_index, local_id) = split_id(id, max_bucket_size(access.page_size()));
    if page_index > u64::from(read_file_size(access, file_id)?) {
        return Err(SizeMapError::UnknownSlot { slot: id });
    }
    Ok((page_index, local_id))
}
