//! In-process blob service
//!
//! `MemoryBlobService` plays the role of a cloud storage account: it owns a
//! set of named containers and an account key, and hands out transports
//! bound to one container. It also carries the hooks tests use to provoke
//! provider failures: queued per-operation faults, container removal, key
//! rotation, artificial latency, and in-flight call tracking.

use super::{
    BackendError, BlobObject, BlobProperties, BlobTransport, ListEntry, ListPage, TransportInfo,
    TransportResult, clamp_range, decode_token, encode_token,
};
use async_trait::async_trait;
use blockvault_common::content_md5;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Transport operations, for fault injection and call accounting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlobOp {
    Get,
    GetRange,
    GetProperties,
    Put,
    Delete,
    List,
}

#[derive(Clone)]
struct StoredBlob {
    data: Bytes,
    metadata: HashMap<String, String>,
    content_md5: String,
}

impl StoredBlob {
    fn properties(&self) -> BlobProperties {
        BlobProperties {
            content_length: self.data.len() as u64,
            content_md5: Some(self.content_md5.clone()),
            metadata: self.metadata.clone(),
        }
    }
}

type Container = Arc<RwLock<BTreeMap<String, StoredBlob>>>;

struct ServiceInner {
    account_key: RwLock<String>,
    containers: DashMap<String, Container>,
    faults: Mutex<HashMap<BlobOp, VecDeque<BackendError>>>,
    latency: Mutex<Option<Duration>>,
    calls: DashMap<BlobOp, AtomicU64>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// In-memory storage account
#[derive(Clone)]
pub struct MemoryBlobService {
    inner: Arc<ServiceInner>,
}

impl MemoryBlobService {
    /// Create an account accepting `account_key`
    pub fn new(account_key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                account_key: RwLock::new(account_key.into()),
                containers: DashMap::new(),
                faults: Mutex::new(HashMap::new()),
                latency: Mutex::new(None),
                calls: DashMap::new(),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a container if it does not exist
    pub fn create_container(&self, name: &str) {
        self.inner
            .containers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(BTreeMap::new())));
    }

    /// Remove a container and everything in it
    pub fn delete_container(&self, name: &str) -> bool {
        self.inner.containers.remove(name).is_some()
    }

    /// Replace the account key, invalidating transports holding the old one
    pub fn rotate_key(&self, new_key: impl Into<String>) {
        *self.inner.account_key.write() = new_key.into();
    }

    /// Bind a transport to `container` using `account_key`
    pub fn transport(&self, container: &str, account_key: &str) -> MemoryTransport {
        MemoryTransport {
            service: self.clone(),
            container: container.to_string(),
            account_key: account_key.to_string(),
        }
    }

    /// Fail the next call of `op` with `err`
    ///
    /// Faults queue up: each call of `op` consumes one.
    pub fn fail_next(&self, op: BlobOp, err: BackendError) {
        self.inner.faults.lock().entry(op).or_default().push_back(err);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock() = latency;
    }

    /// Number of calls of `op` seen so far
    pub fn calls(&self, op: BlobOp) -> u64 {
        self.inner
            .calls
            .get(&op)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    /// Highest number of simultaneously running calls
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// Reset call counters and the in-flight high-water mark
    pub fn reset_call_stats(&self) {
        self.inner.calls.clear();
        self.inner.max_in_flight.store(0, Ordering::SeqCst);
    }

    /// Number of objects in `container`
    pub fn object_count(&self, container: &str) -> usize {
        self.inner
            .containers
            .get(container)
            .map_or(0, |c| c.read().len())
    }

    /// Whether `key` exists in `container`
    pub fn contains(&self, container: &str, key: &str) -> bool {
        self.inner
            .containers
            .get(container)
            .is_some_and(|c| c.read().contains_key(key))
    }

    /// Metadata of `key`, bypassing authentication
    pub fn metadata(&self, container: &str, key: &str) -> Option<HashMap<String, String>> {
        let container = self.inner.containers.get(container)?;
        let blobs = container.read();
        blobs.get(key).map(|blob| blob.metadata.clone())
    }

    async fn begin(&self, op: BlobOp, transport: &MemoryTransport) -> TransportResult<CallGuard> {
        self.inner
            .calls
            .entry(op)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);

        let guard = CallGuard::enter(Arc::clone(&self.inner));

        let latency = *self.inner.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if *self.inner.account_key.read() != transport.account_key {
            return Err(BackendError::AuthenticationFailed(format!(
                "server failed to authenticate the request for container {}",
                transport.container
            )));
        }

        let fault = self
            .inner
            .faults
            .lock()
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        if let Some(err) = fault {
            return Err(err);
        }

        Ok(guard)
    }

    fn container(&self, name: &str) -> TransportResult<Container> {
        self.inner
            .containers
            .get(name)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| {
                BackendError::ContainerNotFound(format!("the specified container {name} does not exist"))
            })
    }
}

/// Tracks one running call for the in-flight high-water mark
struct CallGuard {
    inner: Arc<ServiceInner>,
}

impl CallGuard {
    fn enter(inner: Arc<ServiceInner>) -> Self {
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Transport bound to one container of a [`MemoryBlobService`]
#[derive(Clone)]
pub struct MemoryTransport {
    service: MemoryBlobService,
    container: String,
    account_key: String,
}

impl MemoryTransport {
    /// The account behind this transport
    pub const fn service(&self) -> &MemoryBlobService {
        &self.service
    }

    fn lookup(&self, key: &str) -> TransportResult<StoredBlob> {
        let container = self.service.container(&self.container)?;
        let blobs = container.read();
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(key.to_string()))
    }
}

#[async_trait]
impl BlobTransport for MemoryTransport {
    fn describe(&self) -> TransportInfo {
        TransportInfo {
            provider: "memory",
            container: self.container.clone(),
            connection_params: BTreeMap::from([
                ("container".to_string(), self.container.clone()),
                ("account_key".to_string(), "<redacted>".to_string()),
            ]),
        }
    }

    fn supports_range_reads(&self) -> bool {
        true
    }

    async fn get_object(&self, key: &str) -> TransportResult<BlobObject> {
        let _guard = self.service.begin(BlobOp::Get, self).await?;
        let blob = self.lookup(key)?;
        let properties = blob.properties();
        let body = stream::iter([Ok(blob.data)]);
        Ok(BlobObject {
            properties,
            body: Box::pin(body),
        })
    }

    async fn get_object_range(&self, key: &str, start: u64, end: u64) -> TransportResult<Bytes> {
        let _guard = self.service.begin(BlobOp::GetRange, self).await?;
        let blob = self.lookup(key)?;
        let (start, end) = clamp_range(start, end, blob.data.len() as u64);
        #[allow(clippy::cast_possible_truncation)]
        Ok(blob.data.slice(start as usize..end as usize))
    }

    async fn get_properties(&self, key: &str) -> TransportResult<BlobProperties> {
        let _guard = self.service.begin(BlobOp::GetProperties, self).await?;
        Ok(self.lookup(key)?.properties())
    }

    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        metadata: HashMap<String, String>,
    ) -> TransportResult<()> {
        let _guard = self.service.begin(BlobOp::Put, self).await?;
        let container = self.service.container(&self.container)?;
        let blob = StoredBlob {
            content_md5: content_md5(&data),
            data,
            metadata,
        };
        container.write().insert(key.to_string(), blob);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> TransportResult<()> {
        let _guard = self.service.begin(BlobOp::Delete, self).await?;
        let container = self.service.container(&self.container)?;
        let removed = container.write().remove(key);
        removed
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(key.to_string()))
    }

    async fn list_objects(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
        max_results: usize,
    ) -> TransportResult<ListPage> {
        let _guard = self.service.begin(BlobOp::List, self).await?;
        let container = self.service.container(&self.container)?;
        let start = match continuation_token {
            Some(token) => Bound::Excluded(decode_token(token)?),
            None => Bound::Included(prefix.to_string()),
        };
        let max_results = max_results.max(1);

        let blobs = container.read();
        let mut matching = blobs
            .range((start, Bound::Unbounded))
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, blob)| ListEntry {
                name: name.clone(),
                content_length: blob.data.len() as u64,
            });

        let entries: Vec<ListEntry> = matching.by_ref().take(max_results).collect();
        let continuation_token = match (matching.next(), entries.last()) {
            (Some(_), Some(last)) => Some(encode_token(&last.name)),
            _ => None,
        };
        Ok(ListPage {
            entries,
            continuation_token,
        })
    }
}
