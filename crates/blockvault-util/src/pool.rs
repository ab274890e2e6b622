//! Fixed-capacity object pool
//!
//! Pre-allocates `capacity` values up front. Allocation past capacity and
//! release into a full pool are reported and tolerated rather than treated
//! as errors.

use parking_lot::Mutex;
use tracing::warn;

/// Pool of reusable values
pub struct ObjectPool<T> {
    items: Mutex<Vec<T>>,
    capacity: usize,
    reset: Box<dyn Fn(&mut T) + Send + Sync>,
}

impl<T> ObjectPool<T> {
    /// Create a pool holding `capacity` values built by `allocate`
    ///
    /// `reset` runs on every value handed back through [`ObjectPool::release`].
    pub fn new<A, R>(capacity: usize, mut allocate: A, reset: R) -> Self
    where
        A: FnMut() -> T,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        if capacity == 0 {
            warn!("ObjectPool created without capacity");
        }
        Self {
            items: Mutex::new((0..capacity).map(|_| allocate()).collect()),
            capacity,
            reset: Box::new(reset),
        }
    }

    /// Take a value, or `None` when the pool is exhausted
    pub fn alloc(&self) -> Option<T> {
        let item = self.items.lock().pop();
        if item.is_none() {
            warn!(capacity = self.capacity, "ObjectPool exhausted");
        }
        item
    }

    /// Return a value to the pool
    ///
    /// Values released into a full pool are dropped.
    pub fn release(&self, mut item: T) {
        (self.reset)(&mut item);
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            warn!(capacity = self.capacity, "ObjectPool already full, dropping value");
            return;
        }
        items.push(item);
    }

    /// Number of values currently available
    pub fn available(&self) -> usize {
        self.items.lock().len()
    }

    /// Configured capacity
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
