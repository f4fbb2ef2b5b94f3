//! Transfer Module
//!
//! Moves bulk payloads between a caller-exposed buffer and the backend.
//!
//! ## Managers
//! - [`DefaultTransferManager`]: one staging buffer the size of the whole
//!   transfer, one bulk leg, one backend call
//! - [`PipelineTransferManager`]: the transfer is cut into chunks that
//!   follow a pool's geometric buffer sizes; the bulk leg of one chunk
//!   overlaps the backend leg of the previous one
//!
//! ```text
//!   pull (write path)                 push (read path)
//!
//!   BulkHandle ──pull──► buffer       Backend ──read──► buffer
//!                          │                              │
//!                        write                          push
//!                          ▼                              ▼
//!                       Backend                       BulkHandle
//! ```

mod bulk;
mod default;
mod pipeline;
mod pool;

pub use bulk::{BulkHandle, BulkMode, ExposedBuffer};
pub use default::DefaultTransferManager;
pub use pipeline::PipelineTransferManager;
pub use pool::{BufferPool, PoolSet, PooledBuffer};

use serde_json::Value;

use crate::backend::Backend;
use crate::config::TransferManagerConfig;
use crate::error::{Result, StoreError};
use crate::region::RegionId;

/// One bulk transfer between `bulk[bulk_offset..]` and `region[region_offset..]`
#[derive(Clone, Copy)]
pub struct Transfer<'a> {
    pub region: &'a RegionId,
    pub region_offset: u64,
    pub size: u64,
    pub bulk: &'a dyn BulkHandle,
    pub bulk_offset: u64,
}

impl<'a> Transfer<'a> {
    /// Reject transfers that reach past the end of the exposed buffer
    pub fn check_bulk_bounds(&self) -> Result<()> {
        match self.bulk_offset.checked_add(self.size) {
            Some(end) if end <= self.bulk.len() => Ok(()),
            _ => Err(StoreError::Transfer(format!(
                "bulk range [{}, +{}) exceeds exposed buffer of {} bytes",
                self.bulk_offset,
                self.size,
                self.bulk.len()
            ))),
        }
    }

    pub fn size_usize(&self) -> Result<usize> {
        usize::try_from(self.size)
            .map_err(|_| StoreError::Transfer(format!("transfer of {} bytes too large", self.size)))
    }
}

/// Strategy for staging bulk transfers through local memory
pub trait TransferManager: Send + Sync {
    fn name(&self) -> &'static str;

    /// The manager's part of `get_config`
    fn config(&self) -> Value;

    /// Pull bytes from the caller's buffer and write them to the region
    fn pull(&self, backend: &dyn Backend, transfer: &Transfer<'_>) -> Result<()>;

    /// Read bytes from the region and push them into the caller's buffer
    fn push(&self, backend: &dyn Backend, transfer: &Transfer<'_>) -> Result<()>;
}

/// Build the manager named by the configuration
pub fn build_transfer_manager(config: &TransferManagerConfig) -> Result<Box<dyn TransferManager>> {
    Ok(match config {
        TransferManagerConfig::Default => Box::new(DefaultTransferManager::new()),
        TransferManagerConfig::Pipeline(pipeline) => Box::new(PipelineTransferManager::new(*pipeline)?),
    })
}
