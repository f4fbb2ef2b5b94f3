//! Bulk handles: caller memory the provider may pull from or push into

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, StoreError};

/// A remotely accessible byte range owned by the caller
///
/// `pull` copies out of the caller's memory (the write path), `push`
/// copies into it (the read path). Offsets are relative to the start of
/// the exposed range.
pub trait BulkHandle: Send + Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pull(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    fn push(&self, offset: u64, data: &[u8]) -> Result<()>;
}

/// Access the provider is granted to an exposed buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl BulkMode {
    fn readable(self) -> bool {
        matches!(self, BulkMode::ReadOnly | BulkMode::ReadWrite)
    }

    fn writable(self) -> bool {
        matches!(self, BulkMode::WriteOnly | BulkMode::ReadWrite)
    }
}

/// In-process exposed buffer
#[derive(Debug, Clone)]
pub struct ExposedBuffer {
    data: Arc<RwLock<Vec<u8>>>,
    mode: BulkMode,
}

impl ExposedBuffer {
    /// Expose `data` for the provider to pull from
    pub fn read_only(data: Vec<u8>) -> Self {
        Self { data: Arc::new(RwLock::new(data)), mode: BulkMode::ReadOnly }
    }

    /// Expose `len` zeroed bytes for the provider to push into
    pub fn write_only(len: usize) -> Self {
        Self { data: Arc::new(RwLock::new(vec![0u8; len])), mode: BulkMode::WriteOnly }
    }

    pub fn read_write(data: Vec<u8>) -> Self {
        Self { data: Arc::new(RwLock::new(data)), mode: BulkMode::ReadWrite }
    }

    pub fn mode(&self) -> BulkMode {
        self.mode
    }

    /// Take the bytes back once the transfer is over
    pub fn into_inner(self) -> Vec<u8> {
        match Arc::try_unwrap(self.data) {
            Ok(lock) => lock.into_inner(),
            Err(shared) => shared.read().clone(),
        }
    }

    fn range(&self, offset: u64, len: usize) -> Result<std::ops::Range<usize>> {
        let total = self.data.read().len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        match start.checked_add(len) {
            Some(end) if end <= total => Ok(start..end),
            _ => Err(StoreError::Transfer(format!(
                "bulk access [{}, +{}) exceeds exposed buffer of {} bytes",
                offset, len, total
            ))),
        }
    }
}

impl BulkHandle for ExposedBuffer {
    fn len(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn pull(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if !self.mode.readable() {
            return Err(StoreError::Transfer("exposed buffer is not readable".to_string()));
        }
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.data.read()[range]);
        Ok(())
    }

    fn push(&self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.mode.writable() {
            return Err(StoreError::Transfer("exposed buffer is not writable".to_string()));
        }
        let range = self.range(offset, data.len())?;
        self.data.write()[range].copy_from_slice(data);
        Ok(())
    }
}
