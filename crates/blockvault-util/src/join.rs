//! Keyed single-flight join
//!
//! A [`Join`] is a scope of in-flight computations. Joining a key that
//! already has a pending computation returns that computation's result
//! instead of starting another; the entry is dropped as soon as the
//! computation settles, success or failure.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

type Pending<V> = Shared<BoxFuture<'static, V>>;

/// Scope of keyed in-flight computations
pub struct Join<K, V>
where
    V: Clone,
{
    inflight: Arc<Mutex<HashMap<K, Pending<V>>>>,
}

impl<K, V> Join<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty scope
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `op` for `key`, or wait on the computation already pending for it
    ///
    /// `op` is only invoked when no computation is pending. The computation
    /// is driven by whichever caller polls it, so a caller that stops
    /// waiting does not cancel it for the others.
    pub async fn join<F, Fut>(&self, key: K, op: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        self.start(key, op).await
    }

    /// Check if a computation is pending for `key`
    pub fn is_pending(&self, key: &K) -> bool {
        self.inflight.lock().contains_key(key)
    }

    /// Number of pending computations
    pub fn len(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Check if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.inflight.lock().is_empty()
    }

    fn start<F, Fut>(&self, key: K, op: F) -> Pending<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        if let Some(pending) = self.inflight.lock().get(&key) {
            return pending.clone();
        }

        // Build outside the lock so `op` may itself use this scope
        let fut = op();
        let inflight = Arc::clone(&self.inflight);
        let settle_key = key.clone();
        let pending = async move {
            let value = fut.await;
            inflight.lock().remove(&settle_key);
            value
        }
        .boxed()
        .shared();

        let mut map = self.inflight.lock();
        // Another caller may have registered while `op` ran; the
        // unpolled future built above is simply dropped.
        map.entry(key).or_insert(pending).clone()
    }
}

impl<K, V> Default for Join<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
