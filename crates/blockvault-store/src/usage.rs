//! Usage ledger cache
//!
//! The cached `{size, count}` snapshot owned by one store instance. All
//! mutation goes through a single mutex. Deltas applied before the
//! persisted value has been loaded are kept and folded into it on load.

use blockvault_common::Usage;
use parking_lot::Mutex;
use serde::Serialize;

/// Lifecycle of a store instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    Uninitialized,
    /// Ledger load in flight
    Initializing,
    Ready,
}

#[derive(Debug)]
struct LedgerState {
    usage: Usage,
    dirty: bool,
    state: StoreState,
}

/// Cached usage ledger
#[derive(Debug)]
pub struct UsageLedger {
    inner: Mutex<LedgerState>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LedgerState {
                usage: Usage::ZERO,
                dirty: false,
                state: StoreState::Uninitialized,
            }),
        }
    }

    /// Current snapshot
    pub fn get(&self) -> Usage {
        self.inner.lock().usage
    }

    pub fn state(&self) -> StoreState {
        self.inner.lock().state
    }

    /// Move to `Initializing`
    ///
    /// Returns `false` if a load already started, in which case the caller
    /// must not load again.
    pub fn begin_load(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != StoreState::Uninitialized {
            return false;
        }
        inner.state = StoreState::Initializing;
        true
    }

    /// Fold the persisted value in and move to `Ready`
    ///
    /// `None` means nothing usable was persisted; the store counts from the
    /// deltas seen so far.
    pub fn finish_load(&self, persisted: Option<Usage>) {
        let mut inner = self.inner.lock();
        if let Some(persisted) = persisted {
            inner.usage += persisted;
        }
        inner.state = StoreState::Ready;
    }

    /// Apply a delta
    pub fn update(&self, delta: Usage) {
        if delta.is_zero() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.usage += delta;
        inner.dirty = true;
    }

    /// Snapshot for persistence, clearing the dirty flag
    ///
    /// Returns `None` when nothing changed since the last flush.
    pub fn take_dirty(&self) -> Option<Usage> {
        let mut inner = self.inner.lock();
        if !inner.dirty {
            return None;
        }
        inner.dirty = false;
        Some(inner.usage)
    }

    /// Re-mark as dirty after a failed flush
    pub fn mark_dirty(&self) {
        self.inner.lock().dirty = true;
    }

    /// Reset to zero after the persisted ledger was removed
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.usage = Usage::ZERO;
        inner.dirty = false;
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new()
    }
}
