//! Block store factory
//!
//! Builds the store described by a [`StoreConfig`].

use crate::blob::BlobBlockStore;
use crate::store::BlockStore;
use crate::transport::{FsTransport, MemoryBlobService};
use blockvault_common::{BackendConfig, Result, StoreConfig};
use std::sync::Arc;
use tracing::info;

/// Factory for block stores
pub struct StoreFactory;

impl StoreFactory {
    /// Create the store described by `config`
    ///
    /// The memory backend gets a fresh account with its container already
    /// provisioned. The filesystem backend expects `<root>/<container>` to
    /// exist; a missing directory surfaces as `StorageNotExist` on first use.
    pub fn create(config: &StoreConfig) -> Result<Arc<dyn BlockStore>> {
        config.validate()?;
        info!(
            provider = config.backend.provider(),
            container = config.backend.container(),
            base_path = %config.base_path,
            "creating block store"
        );

        let store: Arc<dyn BlockStore> = match &config.backend {
            BackendConfig::Memory { container } => {
                let account_key = uuid::Uuid::new_v4().simple().to_string();
                let service = MemoryBlobService::new(account_key.clone());
                service.create_container(container);
                Arc::new(BlobBlockStore::new(
                    service.transport(container, &account_key),
                    config,
                ))
            }
            BackendConfig::Fs { root, container } => Arc::new(BlobBlockStore::new(
                FsTransport::new(root.clone(), container.clone()),
                config,
            )),
        };
        Ok(store)
    }
}
