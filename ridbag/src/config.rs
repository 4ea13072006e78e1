//! Store configuration module.
//!
//! This module loads the configuration of a ridbag store from environment
//! variables.
//!
//! # Environment Variables
//!
//! - `RIDBAG_DATA_DIRECTORY`: Directory holding the page files and WAL (default: `./data`)
//! - `RIDBAG_PAGE_SIZE`: Page size in bytes (default: `8192`)
//! - `RIDBAG_BUFFER_POOL_PAGES`: Pages kept in the buffer pool (default: `16384`)
//! - `RIDBAG_SYNC_ON_COMMIT`: Fsync the WAL on every commit (default: `true`)
//!
//! # Invariants
//!
//! - `page_size` is a multiple of 4 between [`MIN_PAGE_SIZE`] and [`MAX_PAGE_SIZE`]
//! - `buffer_pool_pages` is never zero

use std::path::PathBuf;

use crate::storage::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE};

const DATA_DIRECTORY_VAR: &str = "RIDBAG_DATA_DIRECTORY";
const PAGE_SIZE_VAR: &str = "RIDBAG_PAGE_SIZE";
const BUFFER_POOL_PAGES_VAR: &str = "RIDBAG_BUFFER_POOL_PAGES";
const SYNC_ON_COMMIT_VAR: &str = "RIDBAG_SYNC_ON_COMMIT";

/// Store configuration.
///
/// # Post-conditions
///
/// When constructed via `from_env()` or checked with `validate()`:
/// - `page_size` is usable by the page cache
/// - `buffer_pool_pages` is at least 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding the page files, file registry and WAL.
    pub data_directory: PathBuf,
    /// Size of every page in every file. Fixed for the life of a directory.
    pub page_size: usize,
    /// Number of pooled page buffers.
    pub buffer_pool_pages: usize,
    /// Whether each commit waits for the WAL to reach the disk.
    pub sync_on_commit: bool,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl StoreConfig {
    /// Default data directory.
    pub const DEFAULT_DATA_DIRECTORY: &'static str = "./data";
    /// Default number of pooled pages (128 MiB with the default page size).
    pub const DEFAULT_BUFFER_POOL_PAGES: usize = 16_384;

    /// Configuration with defaults for everything but the directory.
    #[must_use]
    pub fn new(data_directory: impl Into<PathBuf>) -> Self {
        Self {
            data_directory: data_directory.into(),
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pool_pages: Self::DEFAULT_BUFFER_POOL_PAGES,
            sync_on_commit: true,
        }
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub const fn with_buffer_pool_pages(mut self, pages: usize) -> Self {
        self.buffer_pool_pages = pages;
        self
    }

    #[must_use]
    pub const fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that does not parse
    /// or fails [`Self::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    /// if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_directory = lookup(DATA_DIRECTORY_VAR)
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DATA_DIRECTORY), PathBuf::from);
        let page_size = parse_var(&lookup, PAGE_SIZE_VAR, DEFAULT_PAGE_SIZE, "a byte count")?;
        let buffer_pool_pages = parse_var(
            &lookup,
            BUFFER_POOL_PAGES_VAR,
            Self::DEFAULT_BUFFER_POOL_PAGES,
            "a page count",
        )?;
        let sync_on_commit = parse_var(&lookup, SYNC_ON_COMMIT_VAR, true, "true or false")?;

        let config = Self {
            data_directory,
            page_size,
            buffer_pool_pages,
            sync_on_commit,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the values the storage layer depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
            || self.page_size % 4 != 0
        {
            return Err(ConfigError::InvalidValue {
                name: PAGE_SIZE_VAR.to_string(),
                message: format!(
                    "{} is not a multiple of 4 between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}",
                    self.page_size
                ),
            });
        }
        if self.buffer_pool_pages == 0 {
            return Err(ConfigError::InvalidValue {
                name: BUFFER_POOL_PAGES_VAR.to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not {expected}"),
        }),
        None => Ok(default),
    }
}
