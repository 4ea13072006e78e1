//! Page 0 of a size-map file.

use crate::sizemap::error::SizeMapError;
use crate::storage::{PageHeader, PageRead, PageType, PageWrite};

const FILE_SIZE_OFFSET: usize = PageHeader::SIZE;

/// Typed view of the entry point page.
///
/// Layout after the page header: `file_size: i32`, the number of bucket
/// pages allocated after page 0.
pub struct EntryPoint<P> {
    page: P,
}

impl<P: PageRead> EntryPoint<P> {
    /// View an initialized entry point page.
    pub fn open(page: P) -> Result<Self, SizeMapError> {
        PageHeader::expect_type(&page, PageType::SizeMapEntryPoint)?;
        Ok(Self { page })
    }

    /// Number of bucket pages.
    pub fn file_size(&self) -> Result<u32, SizeMapError> {
        let size = self.page.get_i32(FILE_SIZE_OFFSET);
        u32::try_from(size)
            .map_err(|_| SizeMapError::Corrupt(format!("negative bucket count {size}")))
    }
}

impl<P: PageWrite> EntryPoint<P> {
    /// Format a fresh page as an entry point with no buckets.
    pub fn init(mut page: P) -> Self {
        PageHeader::init(&mut page, PageType::SizeMapEntryPoint);
        page.set_i32(FILE_SIZE_OFFSET, 0);
        Self { page }
    }

    pub fn set_file_size(&mut self, size: u32) -> Result<(), SizeMapError> {
        let size = i32::try_from(size).map_err(|_| SizeMapError::SlotSpaceExhausted)?;
        self.page.set_i32(FILE_SIZE_OFFSET, size);
        Ok(())
    }
}
