//! Target Handle
//!
//! Client-side proxy for one provider. It holds no server state: only the
//! transport, a worker pool for asynchronous calls and the eager
//! thresholds. Clones share all three, so a threshold change made through
//! one clone applies to every clone.

use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::policy::{EagerThresholds, TransferPath};
use crate::protocol::{Command, Payload, ReadMode};
use crate::region::RegionId;
use crate::request::{AsyncCreateRequest, AsyncRequest, WorkerPool};
use crate::transfer::ExposedBuffer;

use super::transport::Transport;

#[derive(Clone)]
pub struct TargetHandle {
    transport: Arc<dyn Transport>,
    workers: Arc<WorkerPool>,
    thresholds: Arc<EagerThresholds>,
}

impl TargetHandle {
    pub fn new(transport: Arc<dyn Transport>, workers: Arc<WorkerPool>) -> Self {
        Self { transport, workers, thresholds: Arc::new(EagerThresholds::default()) }
    }

    // =========================================================================
    // Thresholds
    // =========================================================================

    pub fn eager_write_threshold(&self) -> u64 {
        self.thresholds.write_threshold()
    }

    pub fn eager_read_threshold(&self) -> u64 {
        self.thresholds.read_threshold()
    }

    pub fn set_eager_write_threshold(&self, bytes: u64) {
        self.thresholds.set_write_threshold(bytes);
    }

    pub fn set_eager_read_threshold(&self, bytes: u64) {
        self.thresholds.set_read_threshold(bytes);
    }

    // =========================================================================
    // Synchronous operations
    // =========================================================================

    pub fn create(&self, size: u64) -> Result<RegionId> {
        self.transport.call(Command::Create { size }, None)?.into_region()
    }

    pub fn write(&self, region: &RegionId, offset: u64, data: &[u8], persist: bool) -> Result<()> {
        let region = *region;
        match self.thresholds.write_path(data.len() as u64) {
            TransferPath::Eager => {
                let payload = Payload::Inline(data.to_vec());
                let command = Command::Write { region, offset, payload, persist };
                self.transport.call(command, None)?.into_done()
            }
            TransferPath::Bulk => {
                let exposed = ExposedBuffer::read_only(data.to_vec());
                let payload = Payload::Bulk { size: data.len() as u64 };
                let command = Command::Write { region, offset, payload, persist };
                self.transport.call(command, Some(&exposed))?.into_done()
            }
        }
    }

    pub fn read(&self, region: &RegionId, offset: u64, size: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(size)
            .map_err(|_| StoreError::Transfer(format!("read of {} bytes too large", size)))?;
        let mut buf = vec![0u8; len];
        self.read_into(region, offset, &mut buf)?;
        Ok(buf)
    }

    /// Read `buf.len()` bytes at `offset` into `buf`
    pub fn read_into(&self, region: &RegionId, offset: u64, buf: &mut [u8]) -> Result<()> {
        let region = *region;
        let size = buf.len() as u64;
        match self.thresholds.read_path(size) {
            TransferPath::Eager => {
                let command = Command::Read { region, offset, size, mode: ReadMode::Eager };
                let data = self.transport.call(command, None)?.into_data()?;
                if data.len() != buf.len() {
                    return Err(StoreError::Protocol(format!(
                        "read returned {} bytes, expected {}",
                        data.len(),
                        buf.len()
                    )));
                }
                buf.copy_from_slice(&data);
            }
            TransferPath::Bulk => {
                let exposed = ExposedBuffer::write_only(buf.len());
                let command = Command::Read { region, offset, size, mode: ReadMode::Bulk };
                self.transport.call(command, Some(&exposed))?.into_done()?;
                buf.copy_from_slice(&exposed.into_inner());
            }
        }
        Ok(())
    }

    /// Create a region exactly fitting `data` and write it
    pub fn create_and_write(&self, data: &[u8], persist: bool) -> Result<RegionId> {
        match self.thresholds.write_path(data.len() as u64) {
            TransferPath::Eager => {
                let command = Command::CreateAndWrite { payload: Payload::Inline(data.to_vec()), persist };
                self.transport.call(command, None)?.into_region()
            }
            TransferPath::Bulk => {
                let exposed = ExposedBuffer::read_only(data.to_vec());
                let payload = Payload::Bulk { size: data.len() as u64 };
                let command = Command::CreateAndWrite { payload, persist };
                self.transport.call(command, Some(&exposed))?.into_region()
            }
        }
    }

    pub fn persist(&self, region: &RegionId, offset: u64, size: u64) -> Result<()> {
        let command = Command::Persist { region: *region, offset, size };
        self.transport.call(command, None)?.into_done()
    }

    pub fn erase(&self, region: &RegionId) -> Result<()> {
        self.transport.call(Command::Erase { region: *region }, None)?.into_done()
    }

    /// The provider's configuration as a JSON string
    pub fn get_config(&self) -> Result<String> {
        self.transport.call(Command::GetConfig, None)?.into_config()
    }

    // =========================================================================
    // Asynchronous operations
    // =========================================================================

    pub fn create_async(&self, size: u64) -> AsyncCreateRequest {
        let handle = self.clone();
        self.workers.submit(move || handle.create(size))
    }

    pub fn write_async(&self, region: &RegionId, offset: u64, data: Vec<u8>, persist: bool) -> AsyncRequest<()> {
        let (handle, region) = (self.clone(), *region);
        self.workers.submit(move || handle.write(&region, offset, &data, persist))
    }

    pub fn read_async(&self, region: &RegionId, offset: u64, size: u64) -> AsyncRequest<Vec<u8>> {
        let (handle, region) = (self.clone(), *region);
        self.workers.submit(move || handle.read(&region, offset, size))
    }

    pub fn create_and_write_async(&self, data: Vec<u8>, persist: bool) -> AsyncCreateRequest {
        let handle = self.clone();
        self.workers.submit(move || handle.create_and_write(&data, persist))
    }

    pub fn persist_async(&self, region: &RegionId, offset: u64, size: u64) -> AsyncRequest<()> {
        let (handle, region) = (self.clone(), *region);
        self.workers.submit(move || handle.persist(&region, offset, size))
    }

    pub fn erase_async(&self, region: &RegionId) -> AsyncRequest<()> {
        let (handle, region) = (self.clone(), *region);
        self.workers.submit(move || handle.erase(&region))
    }
}
