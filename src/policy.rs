//! Eager / bulk transfer decision
//!
//! A payload at or below its threshold travels inline with the request
//! (writes) or the response (reads). Anything larger is moved by bulk
//! transfer: the provider pulls from, or pushes into, a buffer the caller
//! exposes. The choice never changes what an operation does.

use std::sync::atomic::{AtomicU64, Ordering};

/// Threshold applied to both directions unless changed
pub const DEFAULT_EAGER_THRESHOLD: u64 = 2048;

/// Which path a payload takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPath {
    Eager,
    Bulk,
}

/// Runtime-mutable eager thresholds, shared by clones of a handle
#[derive(Debug)]
pub struct EagerThresholds {
    write: AtomicU64,
    read: AtomicU64,
}

impl Default for EagerThresholds {
    fn default() -> Self {
        Self::new(DEFAULT_EAGER_THRESHOLD, DEFAULT_EAGER_THRESHOLD)
    }
}

impl EagerThresholds {
    pub fn new(write: u64, read: u64) -> Self {
        Self { write: AtomicU64::new(write), read: AtomicU64::new(read) }
    }

    pub fn write_threshold(&self) -> u64 {
        self.write.load(Ordering::Relaxed)
    }

    pub fn read_threshold(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    pub fn set_write_threshold(&self, bytes: u64) {
        self.write.store(bytes, Ordering::Relaxed);
    }

    pub fn set_read_threshold(&self, bytes: u64) {
        self.read.store(bytes, Ordering::Relaxed);
    }

    pub fn write_path(&self, size: u64) -> TransferPath {
        path_for(size, self.write_threshold())
    }

    pub fn read_path(&self, size: u64) -> TransferPath {
        path_for(size, self.read_threshold())
    }
}

fn path_for(size: u64, threshold: u64) -> TransferPath {
    if size <= threshold {
        TransferPath::Eager
    } else {
        TransferPath::Bulk
    }
}
