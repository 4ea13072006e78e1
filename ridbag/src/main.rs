#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
//! Opens a data directory, running WAL recovery, and reports what it holds.

use ridbag::collection::CollectionError;
use ridbag::config::StoreConfig;
use ridbag::store::{Store, StoreError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ridbag=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: data_directory={}, page_size={}, sync_on_commit={}",
        config.data_directory.display(),
        config.page_size,
        config.sync_on_commit
    );

    if let Err(e) = run(&config) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn run(config: &StoreConfig) -> Result<(), StoreError> {
    let store = Store::open(config)?;
    let collections = store.collections();

    {
        let view = store.operations().read_view()?;
        for cluster_id in collections.cluster_ids()? {
            let Some(storage) = collections.cluster_storage(cluster_id)? else {
                continue;
            };
            let entries = storage
                .tree()
                .entry_count(&view)
                .map_err(CollectionError::from)?;
            let buckets = storage
                .size_map()
                .bucket_count(&view)
                .map_err(CollectionError::from)?;
            tracing::info!(cluster_id, entries, buckets, "Cluster storage");
        }
    }

    store.close()
}
