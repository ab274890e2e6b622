//! Blob-service block store
//!
//! Adapts any [`BlobTransport`] to the [`BlockStore`] contract. Each block
//! is one object whose payload is the block data and whose `blockmd`
//! metadata slot holds the encoded block metadata. The usage ledger is a
//! payload-less object at `<base_path>/usage` carrying the encoded
//! `{size, count}` in its `usage` slot.

use crate::store_core::{BLOCK_MD_KEY, LEGACY_BLOCK_MD_KEY, StoreCore, USAGE_MD_KEY};
use crate::stats::IoStatsSnapshot;
use crate::store::{BlockData, BlockMdInfo, BlockStore, BlockStoreInfo, DeleteResult};
use crate::transport::{BackendError, BlobProperties, BlobTransport, clamp_range};
use crate::usage::StoreState;
use async_trait::async_trait;
use blockvault_common::{
    BlockId, BlockMd, Result, Slice, SliceChecksum, StorageInfo, StoreConfig, Usage,
    WriteOptions, decode_md, encode_md,
};
use blockvault_util::map_with_concurrency;
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

struct Inner<T> {
    transport: T,
    core: StoreCore,
    delete_concurrency: usize,
    list_page_size: usize,
}

/// Block store over a blob transport
pub struct BlobBlockStore<T: BlobTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: BlobTransport> Clone for BlobBlockStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: BlobTransport> BlobBlockStore<T> {
    /// Bind a store to `transport`
    pub fn new(transport: T, config: &StoreConfig) -> Self {
        let target = transport.describe().container;
        Self {
            inner: Arc::new(Inner {
                core: StoreCore::new(target, &config.base_path),
                transport,
                delete_concurrency: config.delete_concurrency.max(1),
                list_page_size: config.list_page_size.max(1),
            }),
        }
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Storage key of a block
    pub fn block_key(&self, block_id: &BlockId) -> String {
        self.inner.core.block_key(block_id)
    }

    /// Cached usage snapshot
    pub fn usage(&self) -> Usage {
        self.inner.core.ledger.get()
    }
}

impl<T: BlobTransport> Inner<T> {
    async fn read_usage(&self) {
        if !self.core.ledger.begin_load() {
            return;
        }
        let usage_path = self.core.usage_path();
        let persisted = match self.transport.get_properties(usage_path).await {
            Ok(props) => match props.metadata.get(USAGE_MD_KEY).map(|enc| decode_md::<Usage>(enc)) {
                Some(Ok(usage)) => {
                    info!("usage loaded from {usage_path}: size={} count={}", usage.size, usage.count);
                    Some(usage)
                }
                Some(Err(e)) => {
                    error!("usage at {usage_path} is unreadable, counting from zero: {e}");
                    None
                }
                None => {
                    warn!("usage object {usage_path} has no usage slot, counting from zero");
                    None
                }
            },
            Err(BackendError::NotFound(_)) => {
                info!("usage path {usage_path} not found. usage will be counted from zero");
                None
            }
            Err(e) => {
                error!(code = e.code(), "failed to read usage from {usage_path}, counting from zero: {e}");
                None
            }
        };
        self.core.ledger.finish_load(persisted);
    }

    async fn write_usage(&self, usage: Usage) -> Result<()> {
        let usage_path = self.core.usage_path();
        let metadata = HashMap::from([(USAGE_MD_KEY.to_string(), encode_md(&usage)?)]);
        self.transport
            .put_object(usage_path, Bytes::new(), metadata)
            .await
            .map_err(|e| self.core.map_error("write_usage", usage_path, e))?;
        debug!("usage written to {usage_path}: size={} count={}", usage.size, usage.count);
        Ok(())
    }

    async fn fetch(&self, op: &str, block_id: &BlockId) -> Result<(BlobProperties, Bytes)> {
        let key = self.core.block_key(block_id);
        let object = self
            .transport
            .get_object(&key)
            .await
            .map_err(|e| self.core.handle_read_error(op, block_id, e))?;

        let capacity = usize::try_from(object.properties.content_length).unwrap_or(0);
        let data = object
            .body
            .try_fold(BytesMut::with_capacity(capacity), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok::<_, BackendError>(buf)
            })
            .await
            .map_err(|e| self.core.handle_read_error(op, block_id, e))?;
        Ok((object.properties, data.freeze()))
    }

    /// Delete one block, returning the usage it freed
    async fn delete_one(&self, block_id: &BlockId) -> std::result::Result<Usage, BackendError> {
        let key = self.core.block_key(block_id);
        // Without properties the size is unknown, but the payload still goes
        let props = match self.transport.get_properties(&key).await {
            Ok(props) => Some(props),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        match self.transport.delete_object(&key).await {
            Ok(()) => Ok(props.as_ref().map_or(Usage::ZERO, freed_usage)),
            Err(e) if e.is_not_found() => Ok(Usage::ZERO),
            Err(e) => Err(e),
        }
    }
}

/// Usage a stored block accounts for, reconstructed from its properties
fn freed_usage(props: &BlobProperties) -> Usage {
    let encoded_len = props
        .metadata
        .get(BLOCK_MD_KEY)
        .or_else(|| props.metadata.get(LEGACY_BLOCK_MD_KEY))
        .map_or(0, String::len);
    match StoreCore::decode_block_md(&props.metadata) {
        Ok(block_md) => StoreCore::block_usage(&block_md, props.content_length, encoded_len),
        Err(_) => {
            let size = props.content_length.saturating_add(encoded_len as u64);
            Usage::new(i64::try_from(size).unwrap_or(i64::MAX), 1)
        }
    }
}

#[async_trait]
impl<T: BlobTransport> BlockStore for BlobBlockStore<T> {
    async fn init(&self) -> Result<()> {
        if self.state() == StoreState::Ready {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        self.inner
            .core
            .loader
            .join("usage", move || async move { inner.read_usage().await })
            .await;
        Ok(())
    }

    async fn get_storage_info(&self) -> Result<StorageInfo> {
        self.init().await?;
        Ok(StorageInfo::unbounded(self.usage().used_bytes()))
    }

    async fn write_block(
        &self,
        block_md: &BlockMd,
        data: Bytes,
        options: WriteOptions,
    ) -> Result<()> {
        let inner = &self.inner;
        let encoded = StoreCore::encode_block_md(block_md)?;
        let key = inner.core.block_key(&block_md.id);
        let data_len = data.len() as u64;

        let applied = (!options.ignore_usage)
            .then(|| StoreCore::block_usage(block_md, data_len, encoded.len()));
        if let Some(delta) = applied {
            inner.core.ledger.update(delta);
        }

        let metadata = HashMap::from([(BLOCK_MD_KEY.to_string(), encoded)]);
        match inner.transport.put_object(&key, data, metadata).await {
            Ok(()) => {
                inner.core.stats.record_write(data_len, false);
                debug!("write_block: {} ({} bytes) at {}", block_md.id, data_len, key);
                Ok(())
            }
            Err(e) => Err(inner.core.handle_write_error(&block_md.id, applied, e)),
        }
    }

    async fn read_block(&self, block_md: &BlockMd) -> Result<BlockData> {
        let inner = &self.inner;
        let (props, data) = inner.fetch("read_block", &block_md.id).await?;
        let stored_md = StoreCore::decode_block_md(&props.metadata).inspect_err(|e| {
            inner.core.stats.record_read(0, true);
            error!("read_block: {} has unreadable metadata: {e}", block_md.id);
        })?;
        inner.core.stats.record_read(data.len() as u64, false);
        Ok(BlockData {
            data,
            block_md: stored_md,
        })
    }

    async fn read_block_md(&self, block_md: &BlockMd) -> Result<BlockMdInfo> {
        let inner = &self.inner;
        let key = inner.core.block_key(&block_md.id);
        let props = inner
            .transport
            .get_properties(&key)
            .await
            .map_err(|e| inner.core.handle_read_error("read_block_md", &block_md.id, e))?;
        Ok(BlockMdInfo {
            block_md: StoreCore::decode_block_md(&props.metadata)?,
            store_md5: props.content_md5,
        })
    }

    async fn check_block(&self, block_id: &BlockId, slices: &[Slice]) -> Result<String> {
        slices.iter().try_for_each(Slice::validate)?;
        let inner = &self.inner;
        let key = inner.core.block_key(block_id);
        let mut checksum = SliceChecksum::new();

        if slices.is_empty() {
            inner
                .transport
                .get_properties(&key)
                .await
                .map_err(|e| inner.core.handle_read_error("check_block", block_id, e))?;
        } else if inner.transport.supports_range_reads() {
            for slice in slices {
                let bytes = inner
                    .transport
                    .get_object_range(&key, slice.start, slice.end)
                    .await
                    .map_err(|e| inner.core.handle_read_error("check_block", block_id, e))?;
                checksum.update(&bytes);
            }
        } else {
            let (_, data) = inner.fetch("check_block", block_id).await?;
            for slice in slices {
                let (start, end) = clamp_range(slice.start, slice.end, data.len() as u64);
                #[allow(clippy::cast_possible_truncation)]
                checksum.update(&data[start as usize..end as usize]);
            }
        }

        inner.core.stats.record_read(checksum.bytes(), false);
        Ok(checksum.finalize())
    }

    async fn delete_blocks(&self, block_ids: &[BlockId]) -> DeleteResult {
        let inner = &self.inner;
        let outcomes =
            map_with_concurrency(inner.delete_concurrency, block_ids, |id| inner.delete_one(id))
                .await;

        let mut freed = Usage::ZERO;
        let mut result = DeleteResult::default();
        for (block_id, outcome) in block_ids.iter().zip(outcomes) {
            match outcome {
                Ok(usage) => {
                    freed += usage;
                    result.succeeded_block_ids.push(block_id.clone());
                }
                Err(e) => {
                    let err = inner.core.map_error("delete_blocks", block_id.as_str(), e);
                    debug!("delete_blocks: {block_id} marked failed ({})", err.rpc_code());
                    result.failed_block_ids.push(block_id.clone());
                }
            }
        }

        inner.core.ledger.update(-freed);
        if !result.failed_block_ids.is_empty() {
            warn!(
                "delete_blocks: {} of {} deletions failed",
                result.failed_block_ids.len(),
                block_ids.len()
            );
        }
        result
    }

    async fn cleanup_target_path(&self) -> Result<u64> {
        // A load finishing after the reset below would resurrect the old ledger
        self.init().await?;
        let inner = &self.inner;
        let prefix = inner.core.owned_prefix();
        let mut token: Option<String> = None;
        let mut visited = 0u64;

        loop {
            let page = inner
                .transport
                .list_objects(&prefix, token.as_deref(), inner.list_page_size)
                .await
                .map_err(|e| inner.core.map_error("cleanup_target_path", &prefix, e))?;
            if page.entries.is_empty() {
                break;
            }

            visited += page.entries.len() as u64;
            let outcomes = map_with_concurrency(inner.delete_concurrency, &page.entries, |entry| {
                inner.transport.delete_object(&entry.name)
            })
            .await;
            for (entry, outcome) in page.entries.iter().zip(outcomes) {
                match outcome {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => warn!("cleanup_target_path: failed deleting {}: {e}", entry.name),
                }
            }
            info!("cleanup_target_path: visited {visited} objects under {prefix}");

            match page.continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        inner.core.ledger.reset();
        Ok(visited)
    }

    async fn test_store_validity(&self) -> Result<()> {
        let inner = &self.inner;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let probe = BlockId::new(format!("test-delete-non-existing-key-{millis}"));
        let key = inner.core.block_key(&probe);
        match inner.transport.delete_object(&key).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(inner.core.map_error("test_store_validity", &key, e)),
        }
    }

    async fn flush_usage(&self) -> Result<()> {
        // Only a loaded ledger may overwrite the persisted one
        self.init().await?;
        let inner = &self.inner;
        let Some(usage) = inner.core.ledger.take_dirty() else {
            return Ok(());
        };
        inner.write_usage(usage).await.inspect_err(|_| {
            inner.core.ledger.mark_dirty();
        })
    }

    fn get_block_store_info(&self) -> BlockStoreInfo {
        let info = self.inner.transport.describe();
        BlockStoreInfo {
            provider: info.provider.to_string(),
            container: info.container,
            connection_params: info.connection_params,
            blocks_path: self.inner.core.blocks_path().to_string(),
        }
    }

    fn io_stats(&self) -> IoStatsSnapshot {
        self.inner.core.stats.snapshot()
    }

    fn state(&self) -> StoreState {
        self.inner.core.ledger.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BlobObject, BlobOp, FsTransport, ListPage, MemoryBlobService, MemoryTransport, TransportInfo, TransportResult};
    use blockvault_common::{Error, PETABYTE, content_md5};
    use rand::RngCore;
    use std::collections::HashSet;
    use std::time::Duration;

    const CONTAINER: &str = "target";
    const KEY: &str = "account-key";

    fn config() -> StoreConfig {
        StoreConfig {
            base_path: "agent-1".to_string(),
            ..StoreConfig::default()
        }
    }

    fn setup_with(config: &StoreConfig) -> (MemoryBlobService, BlobBlockStore<MemoryTransport>) {
        let service = MemoryBlobService::new(KEY);
        service.create_container(CONTAINER);
        let store = BlobBlockStore::new(service.transport(CONTAINER, KEY), config);
        (service, store)
    }

    fn setup() -> (MemoryBlobService, BlobBlockStore<MemoryTransport>) {
        setup_with(&config())
    }

    fn random_data(len: usize) -> Bytes {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        Bytes::from(data)
    }

    fn encoded_len(md: &BlockMd) -> i64 {
        i64::try_from(StoreCore::encode_block_md(md).unwrap().len()).unwrap()
    }

    async fn write_n(store: &BlobBlockStore<MemoryTransport>, n: usize, len: usize) -> Vec<BlockId> {
        let mut ids = Vec::new();
        for i in 0..n {
            let md = BlockMd::new(format!("blk{i:04}"));
            store
                .write_block(&md, random_data(len), WriteOptions::default())
                .await
                .unwrap();
            ids.push(md.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let (_service, store) = setup();
        for len in [0usize, 1, 1000, 70_000] {
            let md = BlockMd::new(BlockId::generate())
                .with_field("len", len)
                .unwrap()
                .with_field("frags", serde_json::json!([{"idx": 0, "digest": "abc"}]))
                .unwrap();
            let data = random_data(len);
            store
                .write_block(&md, data.clone(), WriteOptions::default())
                .await
                .unwrap();

            let read = store.read_block(&BlockMd::new(md.id.clone())).await.unwrap();
            assert_eq!(read.data, data);
            assert_eq!(read.block_md, md);

            let info = store.read_block_md(&md).await.unwrap();
            assert_eq!(info.block_md, md);
            assert_eq!(info.store_md5, Some(content_md5(&data)));
        }
    }

    #[tokio::test]
    async fn test_example_scenario() {
        let (_service, store) = setup();
        store.init().await.unwrap();
        let before = store.get_storage_info().await.unwrap();

        let md = BlockMd::new("b1").with_field("v", 1).unwrap();
        let data = random_data(1024);
        store
            .write_block(&md, data.clone(), WriteOptions::default())
            .await
            .unwrap();

        let after_write = store.get_storage_info().await.unwrap();
        let expected = 1024 + u64::try_from(encoded_len(&md)).unwrap();
        assert_eq!(after_write.used, before.used + expected);
        assert_eq!(after_write.free, PETABYTE);
        assert_eq!(after_write.total, after_write.free + after_write.used);

        let read = store.read_block(&md).await.unwrap();
        assert_eq!(read.data, data);
        assert_eq!(read.block_md.field("v"), Some(&serde_json::json!(1)));

        let result = store.delete_blocks(&[BlockId::new("b1")]).await;
        assert!(result.failed_block_ids.is_empty());
        assert_eq!(result.succeeded_block_ids, vec![BlockId::new("b1")]);
        assert_eq!(store.get_storage_info().await.unwrap().used, before.used);
    }

    #[tokio::test]
    async fn test_usage_tracks_successful_writes() {
        let (_service, store) = setup();
        store.init().await.unwrap();

        let mut expected = Usage::ZERO;
        for (i, len) in [10usize, 200, 3000].into_iter().enumerate() {
            let md = BlockMd::new(format!("u{i}"));
            store
                .write_block(&md, random_data(len), WriteOptions::default())
                .await
                .unwrap();
            expected += Usage::new(i64::try_from(len).unwrap() + encoded_len(&md), 1);
        }
        assert_eq!(store.usage(), expected);

        store
            .write_block(&BlockMd::new("ignored"), random_data(500), WriteOptions::ignore_usage())
            .await
            .unwrap();
        store
            .write_block(&BlockMd::new("placeholder").preallocated(), random_data(500), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(store.usage(), expected);
        assert_eq!(store.io_stats().writes, 5);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_usage_unchanged() {
        let (service, store) = setup();
        store.init().await.unwrap();
        write_n(&store, 2, 100).await;
        let before = store.usage();

        service.fail_next(BlobOp::Put, BackendError::other("ServerBusy", "try later"));
        let err = store
            .write_block(&BlockMd::new("doomed"), random_data(100), WriteOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err, Error::backend("ServerBusy", "try later"));
        assert_eq!(store.usage(), before);
        assert_eq!(store.io_stats().write_errors, 1);
        assert!(!service.contains(CONTAINER, &store.block_key(&BlockId::new("doomed"))));
    }

    #[tokio::test]
    async fn test_delete_missing_block_succeeds() {
        let (_service, store) = setup();
        let result = store.delete_blocks(&[BlockId::new("never-written")]).await;
        assert!(result.failed_block_ids.is_empty());
        assert_eq!(result.succeeded_block_ids, vec![BlockId::new("never-written")]);
        assert_eq!(store.usage(), Usage::ZERO);
    }

    #[tokio::test]
    async fn test_delete_partitions_ids() {
        let (service, store) = setup();
        store.init().await.unwrap();
        let mut ids = write_n(&store, 8, 64).await;
        let per_block = Usage::new(64 + encoded_len(&BlockMd::new("blk0000")), 1);
        ids.push(BlockId::new("missing-1"));
        ids.push(BlockId::new("missing-2"));

        service.fail_next(BlobOp::Delete, BackendError::other("ServerBusy", "one"));
        service.fail_next(BlobOp::Delete, BackendError::other("ServerBusy", "two"));
        let result = store.delete_blocks(&ids).await;

        assert_eq!(result.failed_block_ids.len(), 2);
        let failed: HashSet<_> = result.failed_block_ids.iter().collect();
        let succeeded: HashSet<_> = result.succeeded_block_ids.iter().collect();
        assert!(failed.is_disjoint(&succeeded));
        let union: HashSet<_> = failed.union(&succeeded).copied().collect();
        assert_eq!(union, ids.iter().collect());
        assert!(succeeded.contains(&BlockId::new("missing-1")));

        // Only the blocks that could not be deleted remain accounted
        assert_eq!(store.usage(), Usage::new(per_block.size * 2, 2));
        for id in &result.failed_block_ids {
            assert!(service.contains(CONTAINER, &store.block_key(id)));
        }
    }

    #[tokio::test]
    async fn test_bulk_delete_bounds_concurrency() {
        let (service, store) = setup();
        let ids = write_n(&store, 40, 16).await;
        service.reset_call_stats();
        service.set_latency(Some(Duration::from_millis(5)));

        let result = store.delete_blocks(&ids).await;
        assert_eq!(result.succeeded_block_ids.len(), 40);
        assert!(service.max_in_flight() <= 10);
        assert!(service.max_in_flight() > 1);
        assert_eq!(service.calls(BlobOp::Delete), 40);
    }

    #[tokio::test]
    async fn test_cleanup_removes_every_page() {
        let config = StoreConfig {
            list_page_size: 7,
            ..config()
        };
        let (service, store) = setup_with(&config);
        store.init().await.unwrap();
        write_n(&store, 25, 32).await;
        store.flush_usage().await.unwrap();
        // Objects outside the store's prefix are left alone
        service
            .transport(CONTAINER, KEY)
            .put_object("agent-10/keep", Bytes::from_static(b"x"), HashMap::new())
            .await
            .unwrap();
        assert_eq!(service.object_count(CONTAINER), 27);

        service.reset_call_stats();
        service.set_latency(Some(Duration::from_millis(2)));
        let visited = store.cleanup_target_path().await.unwrap();

        assert_eq!(visited, 26);
        assert_eq!(service.object_count(CONTAINER), 1);
        assert_eq!(service.calls(BlobOp::List), 4);
        assert!(service.max_in_flight() <= 10);
        assert_eq!(store.usage(), Usage::ZERO);

        // Idempotent
        assert_eq!(store.cleanup_target_path().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_skips_item_failures() {
        let (service, store) = setup();
        write_n(&store, 5, 8).await;
        service.fail_next(BlobOp::Delete, BackendError::other("ServerBusy", "x"));

        assert_eq!(store.cleanup_target_path().await.unwrap(), 5);
        assert_eq!(service.object_count(CONTAINER), 1);
    }

    #[tokio::test]
    async fn test_missing_container_maps_to_storage_not_exist() {
        let (service, store) = setup();
        service.delete_container(CONTAINER);

        let err = store
            .write_block(&BlockMd::new("b1"), random_data(10), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StorageNotExist(_)));
        assert_eq!(err.rpc_code(), "STORAGE_NOT_EXIST");
        assert!(matches!(
            store.test_store_validity().await,
            Err(Error::StorageNotExist(_))
        ));
        assert!(matches!(
            store.read_block(&BlockMd::new("b1")).await,
            Err(Error::StorageNotExist(_))
        ));
        assert_eq!(store.usage(), Usage::ZERO);
    }

    #[tokio::test]
    async fn test_rotated_key_maps_to_auth_failed() {
        let (service, store) = setup();
        service.rotate_key("new-key");

        let err = store.test_store_validity().await.unwrap_err();
        assert!(matches!(err, Error::AuthFailed(_)));
        assert_eq!(err.rpc_code(), "AUTH_FAILED");
        let result = store.delete_blocks(&[BlockId::new("b1")]).await;
        assert_eq!(result.failed_block_ids, vec![BlockId::new("b1")]);
    }

    #[tokio::test]
    async fn test_other_failures_pass_through() {
        let (service, store) = setup();
        service.fail_next(BlobOp::Get, BackendError::other("InternalError", "boom"));
        let err = store.read_block(&BlockMd::new("b1")).await.unwrap_err();
        assert_eq!(err, Error::backend("InternalError", "boom"));
        assert_eq!(store.io_stats().read_errors, 1);

        service.fail_next(BlobOp::Delete, BackendError::other("InternalError", "boom"));
        assert_eq!(
            store.test_store_validity().await.unwrap_err().rpc_code(),
            "InternalError"
        );
    }

    #[tokio::test]
    async fn test_store_validity_on_healthy_store() {
        let (service, store) = setup();
        store.test_store_validity().await.unwrap();
        assert_eq!(service.object_count(CONTAINER), 0);
    }

    #[tokio::test]
    async fn test_read_missing_block() {
        let (_service, store) = setup();
        let err = store.read_block(&BlockMd::new("ghost")).await.unwrap_err();
        assert_eq!(
            err,
            Error::BlockNotFound {
                block_id: "ghost".into()
            }
        );
        assert!(store.read_block_md(&BlockMd::new("ghost")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_init_is_single_flight() {
        let (service, first) = setup();
        first.init().await.unwrap();
        write_n(&first, 3, 100).await;
        first.flush_usage().await.unwrap();
        let persisted = first.usage();

        let store = BlobBlockStore::new(service.transport(CONTAINER, KEY), &config());
        assert_eq!(store.state(), StoreState::Uninitialized);
        service.reset_call_stats();
        service.set_latency(Some(Duration::from_millis(20)));

        let (a, b, c) = tokio::join!(store.get_storage_info(), store.get_storage_info(), store.init());
        c.unwrap();
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(service.calls(BlobOp::GetProperties), 1);
        assert_eq!(store.state(), StoreState::Ready);
        assert_eq!(store.usage(), persisted);

        store.init().await.unwrap();
        assert_eq!(service.calls(BlobOp::GetProperties), 1);
    }

    #[tokio::test]
    async fn test_init_tolerates_missing_or_corrupt_ledger() {
        let (service, store) = setup();
        store.init().await.unwrap();
        assert_eq!(store.state(), StoreState::Ready);
        assert_eq!(store.usage(), Usage::ZERO);

        service
            .transport(CONTAINER, KEY)
            .put_object(
                "agent-1/usage",
                Bytes::new(),
                HashMap::from([(USAGE_MD_KEY.to_string(), "%%%".to_string())]),
            )
            .await
            .unwrap();
        let store = BlobBlockStore::new(service.transport(CONTAINER, KEY), &config());
        store.init().await.unwrap();
        assert_eq!(store.state(), StoreState::Ready);
        assert_eq!(store.usage(), Usage::ZERO);

        service.fail_next(BlobOp::GetProperties, BackendError::other("ServerBusy", "x"));
        let store = BlobBlockStore::new(service.transport(CONTAINER, KEY), &config());
        store.init().await.unwrap();
        assert_eq!(store.state(), StoreState::Ready);
    }

    #[tokio::test]
    async fn test_flush_usage_only_when_dirty() {
        let (service, store) = setup();
        store.init().await.unwrap();
        store.flush_usage().await.unwrap();
        assert_eq!(service.calls(BlobOp::Put), 0);

        write_n(&store, 1, 10).await;
        store.flush_usage().await.unwrap();
        store.flush_usage().await.unwrap();
        assert_eq!(service.calls(BlobOp::Put), 2);

        let stored = service.metadata(CONTAINER, "agent-1/usage").unwrap();
        let usage: Usage = decode_md(&stored[USAGE_MD_KEY]).unwrap();
        assert_eq!(usage, store.usage());
    }

    #[tokio::test]
    async fn test_flush_before_init_keeps_persisted_usage() {
        let (service, first) = setup();
        first.init().await.unwrap();
        write_n(&first, 3, 1000).await;
        first.flush_usage().await.unwrap();
        let persisted = first.usage();
        assert_eq!(persisted.count, 3);

        let second = BlobBlockStore::new(service.transport(CONTAINER, KEY), &config());
        let md = BlockMd::new("late");
        second
            .write_block(&md, random_data(500), WriteOptions::default())
            .await
            .unwrap();
        second.flush_usage().await.unwrap();
        assert_eq!(second.state(), StoreState::Ready);

        let expected = persisted + Usage::new(500 + encoded_len(&md), 1);
        assert_eq!(second.usage(), expected);

        let restarted = BlobBlockStore::new(service.transport(CONTAINER, KEY), &config());
        restarted.init().await.unwrap();
        assert_eq!(restarted.usage(), expected);
    }

    #[tokio::test]
    async fn test_failed_flush_is_retried() {
        let (service, store) = setup();
        write_n(&store, 1, 10).await;
        service.fail_next(BlobOp::Put, BackendError::other("ServerBusy", "x"));
        assert!(store.flush_usage().await.is_err());
        store.flush_usage().await.unwrap();
        assert!(service.contains(CONTAINER, "agent-1/usage"));
    }

    #[tokio::test]
    async fn test_check_block_uses_range_reads() {
        let (service, store) = setup();
        let md = BlockMd::new("c1");
        let data = random_data(4096);
        store
            .write_block(&md, data.clone(), WriteOptions::default())
            .await
            .unwrap();
        service.reset_call_stats();

        let slices = [Slice::new(0, 100).unwrap(), Slice::new(1000, 1500).unwrap(), Slice::new(4000, 9000).unwrap()];
        let checksum = store.check_block(&md.id, &slices).await.unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&data[0..100]);
        expected.extend_from_slice(&data[1000..1500]);
        expected.extend_from_slice(&data[4000..]);
        assert_eq!(checksum, md5_hex(&expected));
        assert_eq!(service.calls(BlobOp::GetRange), 3);
        assert_eq!(service.calls(BlobOp::Get), 0);
    }

    #[tokio::test]
    async fn test_check_block_without_range_reads() {
        let service = MemoryBlobService::new(KEY);
        service.create_container(CONTAINER);
        let store = BlobBlockStore::new(WholeObjectTransport(service.transport(CONTAINER, KEY)), &config());
        let md = BlockMd::new("c1");
        let data = random_data(2048);
        store
            .write_block(&md, data.clone(), WriteOptions::default())
            .await
            .unwrap();

        let slices = [Slice::new(10, 20).unwrap(), Slice::new(2000, 2100).unwrap()];
        let checksum = store.check_block(&md.id, &slices).await.unwrap();
        let mut expected = data[10..20].to_vec();
        expected.extend_from_slice(&data[2000..]);
        assert_eq!(checksum, md5_hex(&expected));
        assert_eq!(service.calls(BlobOp::Get), 1);
        assert_eq!(service.calls(BlobOp::GetRange), 0);
    }

    #[tokio::test]
    async fn test_check_block_rejects_bad_input() {
        let (_service, store) = setup();
        let inverted = Slice { start: 10, end: 5 };
        assert!(matches!(
            store.check_block(&BlockId::new("c1"), &[inverted]).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(store
            .check_block(&BlockId::new("c1"), &[])
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_block_store_info() {
        let (_service, store) = setup();
        let info = store.get_block_store_info();
        assert_eq!(info.provider, "memory");
        assert_eq!(info.container, CONTAINER);
        assert_eq!(info.blocks_path, "agent-1/blocks_tree");
        assert_eq!(info.connection_params["account_key"], "<redacted>");
    }

    #[tokio::test]
    async fn test_fs_backed_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let transport = FsTransport::new(dir.path(), CONTAINER);
        transport.create_container().await.unwrap();
        let store = BlobBlockStore::new(transport, &config());
        store.init().await.unwrap();

        let md = BlockMd::new("f00d").with_field("v", 1).unwrap();
        let data = random_data(100_000);
        store
            .write_block(&md, data.clone(), WriteOptions::default())
            .await
            .unwrap();
        assert!(dir.path().join("target/data/agent-1/blocks_tree/00d.blocks/f00d").exists());

        let read = store.read_block(&md).await.unwrap();
        assert_eq!(read.data, data);
        assert_eq!(read.block_md, md);

        let checksum = store
            .check_block(&md.id, &[Slice::new(5, 50).unwrap()])
            .await
            .unwrap();
        assert_eq!(checksum, md5_hex(&data[5..50]));

        store.flush_usage().await.unwrap();
        let result = store.delete_blocks(&[md.id.clone(), BlockId::new("beef")]).await;
        assert_eq!(result.succeeded_block_ids.len(), 2);
        assert_eq!(store.usage(), Usage::ZERO);
        assert_eq!(store.cleanup_target_path().await.unwrap(), 1);
        store.test_store_validity().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_removes_payload_missing_its_sidecar() {
        let dir = tempfile::TempDir::new().unwrap();
        let transport = FsTransport::new(dir.path(), CONTAINER);
        transport.create_container().await.unwrap();
        let store = BlobBlockStore::new(transport, &config());
        store.init().await.unwrap();

        let md = BlockMd::new("0a1b");
        store
            .write_block(&md, random_data(64), WriteOptions::default())
            .await
            .unwrap();
        let data_path = dir.path().join("target/data/agent-1/blocks_tree/a1b.blocks/0a1b");
        std::fs::remove_file(dir.path().join("target/meta/agent-1/blocks_tree/a1b.blocks/0a1b.json")).unwrap();
        assert!(data_path.exists());

        let result = store.delete_blocks(&[md.id.clone()]).await;
        assert_eq!(result.succeeded_block_ids, vec![md.id]);
        assert!(!data_path.exists());
    }

    fn md5_hex(data: &[u8]) -> String {
        hex::encode(md5::compute(data).0)
    }

    /// Memory transport that only serves whole objects
    struct WholeObjectTransport(MemoryTransport);

    #[async_trait]
    impl BlobTransport for WholeObjectTransport {
        fn describe(&self) -> TransportInfo {
            self.0.describe()
        }

        async fn get_object(&self, key: &str) -> TransportResult<BlobObject> {
            self.0.get_object(key).await
        }

        async fn get_properties(&self, key: &str) -> TransportResult<BlobProperties> {
            self.0.get_properties(key).await
        }

        async fn put_object(
            &self,
            key: &str,
            data: Bytes,
            metadata: HashMap<String, String>,
        ) -> TransportResult<()> {
            self.0.put_object(key, data, metadata).await
        }

        async fn delete_object(&self, key: &str) -> TransportResult<()> {
            self.0.delete_object(key).await
        }

        async fn list_objects(
            &self,
            prefix: &str,
            continuation_token: Option<&str>,
            max_results: usize,
        ) -> TransportResult<ListPage> {
            self.0.list_objects(prefix, continuation_token, max_results).await
        }
    }
}
