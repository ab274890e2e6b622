//! Block I/O statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Read/write counters for one store instance
#[derive(Debug, Default)]
pub struct IoStats {
    pub reads: AtomicU64,
    pub read_bytes: AtomicU64,
    pub read_errors: AtomicU64,
    pub writes: AtomicU64,
    pub write_bytes: AtomicU64,
    pub write_errors: AtomicU64,
}

/// Point-in-time copy of [`IoStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IoStatsSnapshot {
    pub reads: u64,
    pub read_bytes: u64,
    pub read_errors: u64,
    pub writes: u64,
    pub write_bytes: u64,
    pub write_errors: u64,
}

impl IoStats {
    pub fn record_read(&self, bytes: u64, failed: bool) {
        if failed {
            self.read_errors.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.read_bytes.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    pub fn record_write(&self, bytes: u64, failed: bool) {
        if failed {
            self.write_errors.fetch_add(1, Ordering::Relaxed);
        } else {
            self.writes.fetch_add(1, Ordering::Relaxed);
            self.write_bytes.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}
