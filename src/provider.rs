//! Provider Module
//!
//! The server-side operation set: one backend, one Region Table and one
//! transfer manager, wired together from a [`ProviderConfig`].
//!
//! ## Responsibilities
//! - Open the backend and re-register regions that survived a restart
//! - Validate every operation against the Region Table before the backend
//!   sees it (existence first, then bounds)
//! - Route bulk payloads through the transfer manager
//! - Track which byte ranges of each region are durable
//! - Dispatch wire commands (`execute`)

use serde_json::Value;

use crate::backend::{open_backend, Backend};
use crate::config::ProviderConfig;
use crate::error::{Result, StoreError};
use crate::protocol::{Command, Payload, ReadMode, Reply};
use crate::region::RegionId;
use crate::table::RegionTable;
use crate::transfer::{build_transfer_manager, BulkHandle, Transfer, TransferManager};

/// One storage target
pub struct Provider {
    config: ProviderConfig,
    backend: Box<dyn Backend>,
    table: RegionTable,
    transfer: Box<dyn TransferManager>,
}

impl Provider {
    /// Open the backend and transfer manager described by `config`
    ///
    /// On startup:
    /// 1. Validate the configuration
    /// 2. Open (or create) the backend store
    /// 3. Register every region the backend recovered
    /// 4. Build the transfer manager and its buffer pools
    pub fn open(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let backend = open_backend(&config.target)?;

        let table = RegionTable::new(backend.kind().is_persistent());
        let recovered = backend.recover()?;
        if !recovered.is_empty() {
            tracing::info!(regions = recovered.len(), "Recovered regions from backend");
        }
        for (id, size) in recovered {
            table.insert_recovered(id, size);
        }

        let transfer = build_transfer_manager(&config.transfer_manager)?;
        tracing::info!(
            backend = backend.kind().name(),
            transfer_manager = transfer.name(),
            "Provider ready"
        );
        Ok(Self { config, backend, table, transfer })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn region_count(&self) -> usize {
        self.table.len()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub fn create(&self, size: u64) -> Result<RegionId> {
        let id = self.backend.create(size)?;
        self.table.insert(id, size);
        tracing::trace!(region = %id, size, "create");
        Ok(id)
    }

    /// Write inline bytes
    pub fn write(&self, region: &RegionId, offset: u64, data: &[u8], persist: bool) -> Result<()> {
        let entry = self.table.lookup(region)?;
        let len = data.len() as u64;
        entry.check_range(offset, len)?;
        tracing::trace!(region = %region, offset, len, persist, "write");

        entry.mark_written(offset, len);
        self.backend.write(region, offset, data)?;
        if persist {
            self.backend.persist(region, offset, len)?;
            entry.mark_persisted(offset, len);
        }
        Ok(())
    }

    /// Write `size` bytes pulled from `bulk[bulk_offset..]`
    pub fn write_bulk(
        &self,
        region: &RegionId,
        offset: u64,
        bulk: &dyn BulkHandle,
        bulk_offset: u64,
        size: u64,
        persist: bool,
    ) -> Result<()> {
        let entry = self.table.lookup(region)?;
        entry.check_range(offset, size)?;
        tracing::trace!(region = %region, offset, size, persist, "bulk write");

        entry.mark_written(offset, size);
        let transfer = Transfer { region, region_offset: offset, size, bulk, bulk_offset };
        self.transfer.pull(self.backend.as_ref(), &transfer).inspect_err(|e| {
            tracing::warn!(region = %region, offset, size, "Bulk write failed: {}", e);
        })?;
        if persist {
            self.backend.persist(region, offset, size)?;
            entry.mark_persisted(offset, size);
        }
        Ok(())
    }

    /// Read bytes and return them
    pub fn read(&self, region: &RegionId, offset: u64, size: u64) -> Result<Vec<u8>> {
        let entry = self.table.lookup(region)?;
        entry.check_range(offset, size)?;
        tracing::trace!(region = %region, offset, size, "read");

        let len = usize::try_from(size)
            .map_err(|_| StoreError::out_of_range(offset, size, entry.size()))?;
        let mut buf = vec![0u8; len];
        self.backend.read(region, offset, &mut buf)?;
        Ok(buf)
    }

    /// Read `size` bytes and push them into `bulk[bulk_offset..]`
    pub fn read_bulk(
        &self,
        region: &RegionId,
        offset: u64,
        size: u64,
        bulk: &dyn BulkHandle,
        bulk_offset: u64,
    ) -> Result<()> {
        let entry = self.table.lookup(region)?;
        entry.check_range(offset, size)?;
        tracing::trace!(region = %region, offset, size, "bulk read");

        let transfer = Transfer { region, region_offset: offset, size, bulk, bulk_offset };
        self.transfer.push(self.backend.as_ref(), &transfer).inspect_err(|e| {
            tracing::warn!(region = %region, offset, size, "Bulk read failed: {}", e);
        })
    }

    /// Create a region sized to `data` and write it
    ///
    /// The region is erased again if the write fails.
    pub fn create_and_write(&self, data: &[u8], persist: bool) -> Result<RegionId> {
        let id = self.create(data.len() as u64)?;
        self.discard_on_error(id, self.write(&id, 0, data, persist))
    }

    /// Create a region of `size` bytes and fill it from `bulk[bulk_offset..]`
    pub fn create_and_write_bulk(
        &self,
        bulk: &dyn BulkHandle,
        bulk_offset: u64,
        size: u64,
        persist: bool,
    ) -> Result<RegionId> {
        let id = self.create(size)?;
        self.discard_on_error(id, self.write_bulk(&id, 0, bulk, bulk_offset, size, persist))
    }

    fn discard_on_error(&self, id: RegionId, outcome: Result<()>) -> Result<RegionId> {
        match outcome {
            Ok(()) => Ok(id),
            Err(e) => {
                if let Err(cleanup) = self.erase(&id) {
                    tracing::warn!(region = %id, "Failed to erase half-written region: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    pub fn persist(&self, region: &RegionId, offset: u64, size: u64) -> Result<()> {
        let entry = self.table.lookup(region)?;
        entry.check_range(offset, size)?;
        tracing::trace!(region = %region, offset, size, "persist");

        self.backend.persist(region, offset, size)?;
        entry.mark_persisted(offset, size);
        Ok(())
    }

    pub fn erase(&self, region: &RegionId) -> Result<()> {
        self.table.remove(region)?;
        tracing::trace!(region = %region, "erase");
        self.backend.erase(region)
    }

    /// Whether `[offset, offset + size)` of a region is known durable
    pub fn is_persisted(&self, region: &RegionId, offset: u64, size: u64) -> Result<bool> {
        let entry = self.table.lookup(region)?;
        entry.check_range(offset, size)?;
        Ok(entry.is_persisted(offset, size))
    }

    /// The effective configuration as a JSON document
    pub fn get_config(&self) -> String {
        let mut doc = self.config.to_json();
        if let Value::Object(extra) = self.backend.config() {
            if let Some(Value::Object(target_cfg)) = doc.pointer_mut("/target/config") {
                for (key, value) in extra {
                    target_cfg.insert(key, value);
                }
            }
        }
        if let Some(tm) = doc.pointer_mut("/transfer_manager/config") {
            *tm = self.transfer.config();
        }
        doc.to_string()
    }

    /// Drop every region and remove the backing store
    pub fn destroy(&self) -> Result<()> {
        self.table.clear();
        self.backend.destroy()?;
        tracing::info!(backend = self.backend.kind().name(), "Provider destroyed");
        Ok(())
    }

    // =========================================================================
    // Command Dispatch
    // =========================================================================

    /// Execute a wire command
    ///
    /// `bulk` is the caller's exposed buffer, required by bulk writes and
    /// bulk reads.
    pub fn execute(&self, command: Command, bulk: Option<&dyn BulkHandle>) -> Result<Reply> {
        match command {
            Command::Create { size } => self.create(size).map(Reply::Region),

            Command::Write { region, offset, payload, persist } => match payload {
                Payload::Inline(data) => self.write(&region, offset, &data, persist),
                Payload::Bulk { size } => {
                    self.write_bulk(&region, offset, require_bulk(bulk)?, 0, size, persist)
                }
            }
            .map(|_| Reply::Done),

            Command::Read { region, offset, size, mode } => match mode {
                ReadMode::Eager => self.read(&region, offset, size).map(Reply::Data),
                ReadMode::Bulk => self
                    .read_bulk(&region, offset, size, require_bulk(bulk)?, 0)
                    .map(|_| Reply::Done),
            },

            Command::CreateAndWrite { payload, persist } => match payload {
                Payload::Inline(data) => self.create_and_write(&data, persist),
                Payload::Bulk { size } => {
                    self.create_and_write_bulk(require_bulk(bulk)?, 0, size, persist)
                }
            }
            .map(Reply::Region),

            Command::Persist { region, offset, size } => {
                self.persist(&region, offset, size).map(|_| Reply::Done)
            }

            Command::Erase { region } => self.erase(&region).map(|_| Reply::Done),

            Command::GetConfig => Ok(Reply::Config(self.get_config())),
        }
    }
}

fn require_bulk(bulk: Option<&dyn BulkHandle>) -> Result<&dyn BulkHandle> {
    bulk.ok_or_else(|| StoreError::Transfer("bulk payload without an exposed buffer".to_string()))
}
