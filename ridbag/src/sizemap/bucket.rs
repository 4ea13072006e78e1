//! Fixed-capacity page of collection size counters.

use crate::sizemap::error::SizeMapError;
use crate::storage::{PageHeader, PageRead, PageType, PageWrite};

const CURRENT_SIZE_OFFSET: usize = PageHeader::SIZE;
const SLOTS_OFFSET: usize = CURRENT_SIZE_OFFSET + 4;
const SLOT_SIZE: usize = 4;

/// Marks a deleted slot.
const DELETED: i32 = -1;

/// Number of counter slots that fit in one bucket page.
#[must_use]
pub const fn max_bucket_size(page_size: usize) -> u32 {
    #[allow(clippy::cast_possible_truncation)] // page_size <= MAX_PAGE_SIZE
    let slots = ((page_size - SLOTS_OFFSET) / SLOT_SIZE) as u32;
    slots
}

/// Typed view of a bucket page.
///
/// Layout after the page header: `current_size: i32` (slots handed out so
/// far), then `max_bucket_size` `i32` counters. A counter of -1 marks a
/// deleted slot.
pub struct Bucket<P> {
    page: P,
}

impl<P: PageRead> Bucket<P> {
    /// View an initialized bucket page.
    pub fn open(page: P) -> Result<Self, SizeMapError> {
        PageHeader::expect_type(&page, PageType::SizeMapBucket)?;
        Ok(Self { page })
    }

    /// Number of slots allocated in this bucket.
    pub fn current_size(&self) -> Result<u32, SizeMapError> {
        let size = self.page.get_i32(CURRENT_SIZE_OFFSET);
        u32::try_from(size)
            .ok()
            .filter(|size| *size <= self.capacity())
            .ok_or_else(|| SizeMapError::Corrupt(format!("invalid bucket size {size}")))
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        max_bucket_size(self.page.page_size())
    }

    /// Counter value of a live slot.
    pub fn get_size(&self, local_id: u32) -> Result<i32, SizeMapError> {
        let value = self.slot(local_id)?;
        if value < 0 {
            return Err(SizeMapError::DeletedSlot { slot: local_id });
        }
        Ok(value)
    }

    fn slot(&self, local_id: u32) -> Result<i32, SizeMapError> {
        if local_id >= self.current_size()? {
            return Err(SizeMapError::UnknownSlot { slot: local_id });
        }
        Ok(self.page.get_i32(slot_offset(local_id)))
    }
}

impl<P: PageWrite> Bucket<P> {
    /// Format a fresh page as an empty bucket.
    pub fn init(mut page: P) -> Self {
        PageHeader::init(&mut page, PageType::SizeMapBucket);
        page.set_i32(CURRENT_SIZE_OFFSET, 0);
        Self { page }
    }

    /// Allocate the next slot with a zero counter.
    ///
    /// Returns `None` when the bucket is full.
    pub fn add_entry(&mut self) -> Result<Option<u32>, SizeMapError> {
        let local_id = self.current_size()?;
        if local_id >= self.capacity() {
            return Ok(None);
        }

        self.page.set_i32(slot_offset(local_id), 0);
        self.set_current_size(local_id + 1);
        Ok(Some(local_id))
    }

    pub fn increment_size(&mut self, local_id: u32) -> Result<i32, SizeMapError> {
        let value = self.get_size(local_id)?;
        let value = value
            .checked_add(1)
            .ok_or(SizeMapError::CounterOverflow { slot: local_id })?;
        self.page.set_i32(slot_offset(local_id), value);
        Ok(value)
    }

    pub fn decrement_size(&mut self, local_id: u32) -> Result<i32, SizeMapError> {
        let value = self.get_size(local_id)?;
        if value == 0 {
            return Err(SizeMapError::EmptyCounter { slot: local_id });
        }
        self.page.set_i32(slot_offset(local_id), value - 1);
        Ok(value - 1)
    }

    /// Mark a slot deleted. Its id is not handed out again.
    pub fn delete(&mut self, local_id: u32) -> Result<(), SizeMapError> {
        if self.slot(local_id)? < 0 {
            return Err(SizeMapError::AlreadyDeleted { slot: local_id });
        }
        self.page.set_i32(slot_offset(local_id), DELETED);
        Ok(())
    }

    fn set_current_size(&mut self, size: u32) {
        // Bounded by capacity, which fits in i32
        let size = i32::try_from(size).unwrap_or(i32::MAX);
        self.page.set_i32(CURRENT_SIZE_OFFSET, size);
    }
}

const fn slot_offset(local_id: u32) -> usize {
    SLOTS_OFFSET + local_id as usize * SLOT_SIZE
}
