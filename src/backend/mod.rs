//! Backend Module
//!
//! Pluggable storage substrates that regions are allocated on.
//!
//! ## Variants
//! - `memory`: volatile process memory, one heap buffer per region
//! - `abtio`: a single store file driven by an internal I/O engine
//! - `pmdk`: a memory-mapped persistent store file, flushed by range
//!
//! The variant is chosen once, when the provider is opened, from the
//! `target` section of the configuration. Everything above this layer
//! talks to a `Box<dyn Backend>` and never inspects which one it got.
//!
//! ## Contract
//! Backends validate only what they can see: whether a handle refers to
//! live storage, and whether a range fits the allocation. The Region Table
//! performs the authoritative existence and bounds checks before calling
//! in; backends repeat them so they stay safe when used on their own.

mod abtio;
mod memory;
mod pmem;

pub use abtio::AbtIoBackend;
pub use memory::MemoryBackend;
pub use pmem::PmemBackend;

use serde_json::Value;

pub use crate::config::BackendKind;
use crate::config::TargetConfig;
use crate::error::Result;
use crate::region::RegionId;

/// Raw byte-range primitives over backend storage
pub trait Backend: Send + Sync {
    /// Which variant this is
    fn kind(&self) -> BackendKind;

    /// Reserve `size` bytes and mint a RegionID for them
    fn create(&self, size: u64) -> Result<RegionId>;

    /// Copy `data` into the region starting at `offset`
    fn write(&self, region: &RegionId, offset: u64, data: &[u8]) -> Result<()>;

    /// Fill `buf` from the region starting at `offset`
    fn read(&self, region: &RegionId, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Make `[offset, offset + size)` durable
    fn persist(&self, region: &RegionId, offset: u64, size: u64) -> Result<()>;

    /// Release the region's storage
    fn erase(&self, region: &RegionId) -> Result<()>;

    /// Regions that survived from a previous open, with their sizes
    fn recover(&self) -> Result<Vec<(RegionId, u64)>> {
        Ok(Vec::new())
    }

    /// Close the store and remove anything it keeps on disk
    fn destroy(&self) -> Result<()>;

    /// The backend's part of `get_config`
    fn config(&self) -> Value;
}

/// Open the backend described by `target`
pub fn open_backend(target: &TargetConfig) -> Result<Box<dyn Backend>> {
    target.validate()?;
    let backend: Box<dyn Backend> = match target.kind {
        BackendKind::Memory => Box::new(MemoryBackend::new()),
        BackendKind::AbtIo => Box::new(AbtIoBackend::open(target)?),
        BackendKind::Pmdk => Box::new(PmemBackend::open(target)?),
    };
    tracing::debug!(backend = target.kind.name(), "Opened backend");
    Ok(backend)
}

/// Bounds check shared by every backend
pub(crate) fn check_bounds(offset: u64, len: u64, size: u64) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(crate::error::StoreError::out_of_range(offset, len, size)),
    }
}
