//! A data directory opened for use.
//!
//! Opening a store runs WAL recovery, then registers every cluster whose
//! shared tree is on disk.

use std::sync::Arc;

use tracing::info;

use crate::collection::{CollectionError, CollectionManager};
use crate::config::{ConfigError, StoreConfig};
use crate::storage::{AtomicOperationsManager, PageCache, StorageError};

/// Errors from opening or closing a store.
#[derive(Debug)]
pub enum StoreError {
    Config(ConfigError),
    Storage(StorageError),
    Collection(CollectionError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Collection(e) => write!(f, "collection error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Storage(e) => Some(e),
            Self::Collection(e) => Some(e),
        }
    }
}

impl From<ConfigError> for StoreError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StorageError> for StoreError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<CollectionError> for StoreError {
    fn from(e: CollectionError) -> Self {
        Self::Collection(e)
    }
}

/// Page cache, operations manager and collection manager of one directory.
pub struct Store {
    config: StoreConfig,
    collections: CollectionManager,
}

impl Store {
    /// Open (or initialize) the store in `config.data_directory`.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let cache = PageCache::open(
            &config.data_directory,
            config.page_size,
            config.buffer_pool_pages,
        )?;
        let operations = AtomicOperationsManager::open(cache, config.sync_on_commit)?;
        let collections = CollectionManager::new(operations);
        let clusters = collections.load_existing_clusters()?;

        info!(
            directory = %config.data_directory.display(),
            page_size = config.page_size,
            clusters = clusters.len(),
            "Opened store"
        );
        Ok(Self {
            config: config.clone(),
            collections,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub const fn collections(&self) -> &CollectionManager {
        &self.collections
    }

    #[must_use]
    pub fn operations(&self) -> &Arc<AtomicOperationsManager> {
        self.collections.operations()
    }

    /// Flush every file and release the in-memory state.
    pub fn close(self) -> Result<(), StoreError> {
        self.collections.close()?;
        self.operations().cache().close()?;
        info!(directory = %self.config.data_directory.display(), "Closed store");
        Ok(())
    }
}
