//! Single-buffer transfer manager

use serde_json::{json, Value};

use super::{Transfer, TransferManager};
use crate::backend::Backend;
use crate::config::TransferManagerConfig;
use crate::error::Result;

/// Stages each transfer through one buffer of exactly its size
#[derive(Debug, Default)]
pub struct DefaultTransferManager;

impl DefaultTransferManager {
    pub fn new() -> Self {
        Self
    }
}

impl TransferManager for DefaultTransferManager {
    fn name(&self) -> &'static str {
        TransferManagerConfig::DEFAULT_NAME
    }

    fn config(&self) -> Value {
        json!({})
    }

    fn pull(&self, backend: &dyn Backend, transfer: &Transfer<'_>) -> Result<()> {
        transfer.check_bulk_bounds()?;
        let mut buf = vec![0u8; transfer.size_usize()?];
        transfer.bulk.pull(transfer.bulk_offset, &mut buf)?;
        backend.write(transfer.region, transfer.region_offset, &buf)
    }

    fn push(&self, backend: &dyn Backend, transfer: &Transfer<'_>) -> Result<()> {
        transfer.check_bulk_bounds()?;
        let mut buf = vec![0u8; transfer.size_usize()?];
        backend.read(transfer.region, transfer.region_offset, &mut buf)?;
        transfer.bulk.push(transfer.bulk_offset, &buf)
    }
}
