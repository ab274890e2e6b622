//! BlockVault Store - Block storage over heterogeneous backends
//!
//! This crate provides:
//! - The [`BlockStore`] contract consumed by the agent
//! - [`BlobBlockStore`], the adapter over any [`BlobTransport`]
//! - Usage ledger accounting and I/O statistics shared by all adapters
//! - Backend transports (in-memory blob service, filesystem)
//!
//! # Example
//!
//! ```
//! use blockvault_common::{BlockMd, StoreConfig, WriteOptions};
//! use blockvault_store::StoreFactory;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = StoreFactory::create(&StoreConfig::default()).unwrap();
//! store.init().await.unwrap();
//!
//! let md = BlockMd::new("b1").with_field("v", 1).unwrap();
//! store.write_block(&md, "hello".into(), WriteOptions::default()).await.unwrap();
//! assert_eq!(store.read_block(&md).await.unwrap().data, "hello");
//! # });
//! ```

pub mod blob;
pub mod factory;
pub mod stats;
pub mod store;
pub mod store_core;
pub mod transport;
pub mod usage;

pub use blob::BlobBlockStore;
pub use store_core::StoreCore;
pub use factory::StoreFactory;
pub use stats::{IoStats, IoStatsSnapshot};
pub use store::{BlockData, BlockMdInfo, BlockStore, BlockStoreInfo, DeleteResult};
pub use transport::{
    BackendError, BlobTransport, FsTransport, MemoryBlobService, MemoryTransport,
};
pub use usage::{StoreState, UsageLedger};
