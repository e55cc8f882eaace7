//! Object storage backends
//!
//! All traversal and transfer code is written against the `ObjectStore`
//! trait and a `SharedStore` handle; which backend sits behind it is decided
//! once, from configuration, by `open_store`.

pub mod object_store;
pub mod prefixed;
pub mod simulated_store;
#[cfg(feature = "s3")]
pub mod s3_store;

pub use object_store::{
    group_by_delimiter, ContentFingerprint, FingerprintAlgorithm, HandleGauge,
    InMemoryObjectStore, ListResult, LocalFsObjectStore, ObjectAttributes, ObjectReader,
    ObjectStore, ObjectWriter, SharedStore, StoreEntry, StoreFuture, LIST_PAGE_SIZE,
};
pub use prefixed::PrefixedStore;
pub use simulated_store::{SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats};
#[cfg(feature = "s3")]
pub use s3_store::S3ObjectStore;

use crate::config::{ObjectStoreType, StoreConfig};
use crate::error::{ConfigError, ConfigResult};
use std::sync::Arc;
use tracing::info;

/// Build the store described by `config`, scoped under its key prefix
pub fn open_store(config: &StoreConfig) -> ConfigResult<SharedStore> {
    let base: SharedStore = match config.store_type {
        ObjectStoreType::InMemory => Arc::new(InMemoryObjectStore::new()),
        ObjectStoreType::LocalFs => {
            let path = config
                .local_path
                .clone()
                .ok_or(ConfigError::Missing("local_path"))?;
            Arc::new(LocalFsObjectStore::new(path))
        }
        #[cfg(feature = "s3")]
        ObjectStoreType::S3 => {
            let s3 = config.s3.as_ref().ok_or(ConfigError::Missing("s3"))?;
            Arc::new(S3ObjectStore::new(s3)?)
        }
    };

    info!(
        store_type = ?config.store_type,
        prefix = %config.prefix,
        traversal = ?config.traversal,
        "Opened object store"
    );

    if config.prefix.trim_matches('/').is_empty() {
        Ok(base)
    } else {
        Ok(Arc::new(PrefixedStore::new(base, &config.prefix)))
    }
}
