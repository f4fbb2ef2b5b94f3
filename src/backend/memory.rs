//! Volatile in-memory backend
//!
//! Each region is its own heap buffer behind a lock, so writers on
//! different regions never contend. Slot numbers are never reused; the
//! RegionID is `(slot, size)`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};

use super::{check_bounds, Backend, BackendKind};
use crate::error::{Result, StoreError};
use crate::region::RegionId;

pub struct MemoryBackend {
    regions: RwLock<HashMap<u64, Arc<RwLock<Vec<u8>>>>>,
    next_slot: AtomicU64,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            regions: RwLock::new(HashMap::new()),
            next_slot: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn region(&self, id: &RegionId) -> Result<Arc<RwLock<Vec<u8>>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::BackendUnavailable("memory store destroyed".to_string()));
        }
        let (slot, _) = id.parts();
        self.regions
            .read()
            .get(&slot)
            .cloned()
            .ok_or_else(|| StoreError::UnknownRegion(id.to_string()))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn create(&self, size: u64) -> Result<RegionId> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::BackendUnavailable("memory store destroyed".to_string()));
        }
        let len = usize::try_from(size)
            .map_err(|_| StoreError::OutOfSpace(format!("{} bytes exceeds address space", size)))?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| StoreError::OutOfSpace(format!("cannot allocate {} bytes: {}", size, e)))?;
        data.resize(len, 0);

        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        self.regions.write().insert(slot, Arc::new(RwLock::new(data)));
        Ok(RegionId::from_parts(slot, size))
    }

    fn write(&self, region: &RegionId, offset: u64, data: &[u8]) -> Result<()> {
        let buf = self.region(region)?;
        let mut buf = buf.write();
        check_bounds(offset, data.len() as u64, buf.len() as u64)?;
        let start = offset as usize;
        buf[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, region: &RegionId, offset: u64, out: &mut [u8]) -> Result<()> {
        let buf = self.region(region)?;
        let buf = buf.read();
        check_bounds(offset, out.len() as u64, buf.len() as u64)?;
        let start = offset as usize;
        out.copy_from_slice(&buf[start..start + out.len()]);
        Ok(())
    }

    fn persist(&self, region: &RegionId, offset: u64, size: u64) -> Result<()> {
        let buf = self.region(region)?;
        let len = buf.read().len() as u64;
        check_bounds(offset, size, len)
    }

    fn erase(&self, region: &RegionId) -> Result<()> {
        let (slot, _) = region.parts();
        self.regions
            .write()
            .remove(&slot)
            .map(|_| ())
            .ok_or_else(|| StoreError::UnknownRegion(region.to_string()))
    }

    fn destroy(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.regions.write().clear();
        Ok(())
    }

    fn config(&self) -> Value {
        json!({})
    }
}
