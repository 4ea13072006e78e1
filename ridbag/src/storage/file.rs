//! Paged data file I/O.
//!
//! A `PagedFile` is a flat array of `page_size` pages with no file header:
//! page `n` lives at byte offset `n * page_size`. File metadata (name, id)
//! is kept by the registry, not in the file itself.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::error::StorageError;
use crate::storage::page::{Page, PageIndex};

/// A data file handle with page-granular I/O.
pub struct PagedFile {
    file: File,
    path: PathBuf,
    page_size: usize,
    page_count: u64,
}

impl PagedFile {
    /// Create a new, empty file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, page_size: usize) -> Result<Self, FileError> {
        if path.exists() {
            return Err(FileError::AlreadyExists(path.to_path_buf()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(FileError::Io)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
            page_count: 0,
        })
    }

    /// Open an existing file.
    ///
    /// A trailing partial page (an extension torn by a crash) is ignored and
    /// overwritten by the next write past the last full page.
    pub fn open(path: &Path, page_size: usize) -> Result<Self, FileError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(FileError::Io)?;

        let len = file.metadata().map_err(FileError::Io)?.len();
        let page_count = len / page_size as u64;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
            page_count,
        })
    }

    /// Read a page into `page`.
    pub fn read_page(&mut self, page_index: PageIndex, page: &mut Page) -> Result<(), FileError> {
        if page_index >= self.page_count {
            return Err(FileError::PageOutOfBounds {
                page_index,
                page_count: self.page_count,
            });
        }
        if page.len() != self.page_size {
            return Err(FileError::SizeMismatch {
                expected: self.page_size,
                actual: page.len(),
            });
        }

        self.file
            .seek(SeekFrom::Start(self.offset_of(page_index)))
            .map_err(FileError::Io)?;
        self.file
            .read_exact(page.as_bytes_mut())
            .map_err(FileError::Io)?;

        Ok(())
    }

    /// Write a page, extending the file when `page_index` is past the end.
    pub fn write_page(&mut self, page_index: PageIndex, page: &Page) -> Result<(), FileError> {
        if page.len() != self.page_size {
            return Err(FileError::SizeMismatch {
                expected: self.page_size,
                actual: page.len(),
            });
        }

        if page_index >= self.page_count {
            self.file
                .set_len(self.offset_of(page_index + 1))
                .map_err(FileError::Io)?;
            self.page_count = page_index + 1;
        }

        self.file
            .seek(SeekFrom::Start(self.offset_of(page_index)))
            .map_err(FileError::Io)?;
        self.file
            .write_all(page.as_bytes())
            .map_err(FileError::Io)?;

        Ok(())
    }

    /// Sync all pending writes to disk.
    pub fn sync(&self) -> Result<(), FileError> {
        self.file.sync_all().map_err(FileError::Io)
    }

    /// Get the total number of pages in the file.
    #[must_use]
    pub const fn page_count(&self) -> u64 {
        self.page_count
    }

    /// Path of the file on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    const fn offset_of(&self, page_index: PageIndex) -> u64 {
        page_index * self.page_size as u64
    }
}

/// Errors that can occur during file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(PathBuf),
    /// Page index out of bounds.
    PageOutOfBounds {
        page_index: PageIndex,
        page_count: u64,
    },
    /// Page buffer does not match the file's page size.
    SizeMismatch { expected: usize, actual: usize },
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::PageOutOfBounds {
                page_index,
                page_count,
            } => {
                write!(
                    f,
                    "page {page_index} out of bounds (total pages: {page_count})"
                )
            }
            Self::SizeMismatch { expected, actual } => {
                write!(f, "page buffer is {actual} bytes, file uses {expected}")
            }
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::AlreadyExists(_) | Self::PageOutOfBounds { .. } | Self::SizeMismatch { .. } => {
                None
            }
        }
    }
}

impl From<FileError> for StorageError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Io(io_err) => Self::Io(io_err),
            FileError::AlreadyExists(path) => Self::FileExists(path.display().to_string()),
            FileError::PageOutOfBounds { .. } | FileError::SizeMismatch { .. } => {
                Self::Corruption(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::{MIN_PAGE_SIZE, PageRead, PageWrite};
    use tempfile::tempdir;

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("test.grb");

        {
            let file = PagedFile::create(&path, MIN_PAGE_SIZE).expect("failed to create");
            assert_eq!(file.page_count(), 0);
        }

        let file = PagedFile::open(&path, MIN_PAGE_SIZE).expect("failed to open");
        assert_eq!(file.page_count(), 0);
        assert_eq!(file.path(), path.as_path());
    }

    #[test]
    fn test_create_already_exists() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("test.grb");

        let _file = PagedFile::create(&path, MIN_PAGE_SIZE).expect("failed to create");

        let result = PagedFile::create(&path, MIN_PAGE_SIZE);
        assert!(matches!(result, Err(FileError::AlreadyExists(_))));
    }

    #[test]
    fn test_write_extends_file() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("test.grb");
        let mut file = PagedFile::create(&path, MIN_PAGE_SIZE).expect("failed to create");

        let mut page = Page::new(MIN_PAGE_SIZE);
        page.set_u64(100, 0xDEAD_BEEF);
        file.write_page(2, &page).expect("failed to write");
        assert_eq!(file.page_count(), 3);

        let mut read_back = Page::new(MIN_PAGE_SIZE);
        file.read_page(2, &mut read_back).expect("failed to read");
        assert_eq!(read_back.get_u64(100), 0xDEAD_BEEF);

        // Skipped pages read as zeros
        file.read_page(1, &mut read_back).expect("failed to read");
        assert_eq!(read_back.get_u64(100), 0);
    }

    #[test]
    fn test_page_out_of_bounds() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("test.grb");
        let mut file = PagedFile::create(&path, MIN_PAGE_SIZE).expect("failed to create");

        let mut page = Page::new(MIN_PAGE_SIZE);
        let result = file.read_page(0, &mut page);
        assert!(matches!(
            result,
            Err(FileError::PageOutOfBounds {
                page_index: 0,
                page_count: 0
            })
        ));
    }

    #[test]
    fn test_page_data_persistence() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("test.grb");

        {
            let mut file = PagedFile::create(&path, MIN_PAGE_SIZE).expect("failed to create");
            let mut page = Page::new(MIN_PAGE_SIZE);
            page.set_i32(12, -1);
            file.write_page(0, &page).expect("failed to write");
            file.sync().expect("failed to sync");
        }

        let mut file = PagedFile::open(&path, MIN_PAGE_SIZE).expect("failed to open");
        assert_eq!(file.page_count(), 1);
        let mut page = Page::new(MIN_PAGE_SIZE);
        file.read_page(0, &mut page).expect("failed to read");
        assert_eq!(page.get_i32(12), -1);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("test.grb");
        let mut file = PagedFile::create(&path, MIN_PAGE_SIZE).expect("failed to create");

        let page = Page::new(MIN_PAGE_SIZE * 2);
        assert!(matches!(
            file.write_page(0, &page),
            Err(FileError::SizeMismatch { .. })
        ));
    }
}
