//! Persistent-memory backend
//!
//! The whole store file is mapped into the address space and regions are
//! plain byte ranges inside the mapping. `persist` flushes exactly the
//! requested range; there is no second medium to write back to.
//!
//! ## Layout
//! ```text
//! ┌────────────┬───────────┬───────────────┬───────────┬───────────────┬──
//! │ Superblock │ Slot hdr  │ data          │ Slot hdr  │ data          │
//! │ (64 B)     │ (64 B)    │ (cap, 64 B ×) │ (64 B)    │ (cap, 64 B ×) │
//! └────────────┴───────────┴───────────────┴───────────┴───────────────┴──
//! ```
//!
//! Slots are carved off the front of the free area and, once erased, are
//! reused first-fit by any later region that fits their capacity. Every
//! allocation takes a fresh generation number which is stored both in the
//! slot header and in the RegionID `(slot offset, generation)`, so an id
//! for an erased region never resolves to a later tenant of the slot.
//!
//! ## Concurrency
//! There is no lock around the mapping. Each live slot carries its own
//! read/write lock: writes hold it exclusively, reads share it, and erase
//! takes it exclusively before the slot can return to the free list.
//! Regions in different slots never contend, and `persist` runs msync with
//! no lock held.

use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use memmap2::MmapMut;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};

use super::{check_bounds, Backend, BackendKind};
use crate::config::TargetConfig;
use crate::error::{Result, StoreError};
use crate::region::RegionId;

const SUPERBLOCK_MAGIC: &[u8; 8] = b"RGNPMEM1";
const SUPERBLOCK_VERSION: u32 = 1;
const SUPERBLOCK_SIZE: u64 = 64;

const SLOT_MAGIC: u32 = 0x504D_5331;
const SLOT_HEADER_SIZE: u64 = 64;
const SLOT_ALIGN: u64 = 64;
const STATE_LIVE: u32 = 1;
const STATE_FREE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotHeader {
    state: u32,
    size: u64,
    capacity: u64,
    generation: u64,
}

impl SlotHeader {
    fn encode(&self) -> [u8; SLOT_HEADER_SIZE as usize] {
        let mut buf = [0u8; SLOT_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&SLOT_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.state.to_le_bytes());
        buf[8..16].copy_from_slice(&self.size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.capacity.to_le_bytes());
        buf[24..32].copy_from_slice(&self.generation.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        let word = |at: usize| {
            let mut w = [0u8; 8];
            w.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(w)
        };
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != SLOT_MAGIC {
            return None;
        }
        Some(Self {
            state: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            size: word(8),
            capacity: word(16),
            generation: word(24),
        })
    }
}

fn encode_superblock(capacity: u64) -> [u8; SUPERBLOCK_SIZE as usize] {
    let mut sb = [0u8; SUPERBLOCK_SIZE as usize];
    sb[0..8].copy_from_slice(SUPERBLOCK_MAGIC);
    sb[8..12].copy_from_slice(&SUPERBLOCK_VERSION.to_le_bytes());
    sb[16..24].copy_from_slice(&capacity.to_le_bytes());
    let crc = crc32fast::hash(&sb[0..24]);
    sb[24..28].copy_from_slice(&crc.to_le_bytes());
    sb
}

fn check_superblock(sb: &[u8]) -> Result<()> {
    if &sb[0..8] != SUPERBLOCK_MAGIC {
        return Err(StoreError::BackendUnavailable("not a pmdk store (bad magic)".to_string()));
    }
    let stored_crc = u32::from_le_bytes([sb[24], sb[25], sb[26], sb[27]]);
    if crc32fast::hash(&sb[0..24]) != stored_crc {
        return Err(StoreError::BackendUnavailable("pmdk superblock checksum mismatch".to_string()));
    }
    let version = u32::from_le_bytes([sb[8], sb[9], sb[10], sb[11]]);
    if version != SUPERBLOCK_VERSION {
        return Err(StoreError::BackendUnavailable(format!(
            "unsupported pmdk store version {}",
            version
        )));
    }
    Ok(())
}

// =============================================================================
// Mapping
// =============================================================================

/// The store file mapping, shared by every slot
///
/// Slots never overlap, so each byte range is owned by exactly one slot
/// and access to it is ordered by that slot's lock instead of one lock
/// around the whole mapping.
struct Mapping {
    map: MmapMut,
    base: *mut u8,
    len: usize,
}

// SAFETY: `base` points into `map`, which stays mapped for the lifetime of
// the `Mapping`. Bytes are only touched through `copy_in`, `copy_out` and
// `zero`, whose callers hold the owning slot's lock (or own a slot that no
// other thread can reach yet), so no two threads race on the same byte.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    fn new(mut map: MmapMut) -> Self {
        let base = map.as_mut_ptr();
        let len = map.len();
        Self { map, base, len }
    }

    /// Start of `[at, at + len)` as an index, if it lies inside the mapping
    fn range(&self, at: u64, len: usize) -> Result<usize> {
        usize::try_from(at)
            .ok()
            .filter(|&start| start.checked_add(len).is_some_and(|end| end <= self.len))
            .ok_or_else(|| {
                StoreError::OutOfRange(format!("{} bytes at {} exceed the pmdk mapping", len, at))
            })
    }

    /// Caller must have exclusive access to the target range
    fn copy_in(&self, at: u64, data: &[u8]) -> Result<()> {
        let start = self.range(at, data.len())?;
        // SAFETY: the range is inside the mapping and the caller holds the
        // owning slot exclusively.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(start), data.len()) };
        Ok(())
    }

    /// Caller must keep writers of the source range out
    fn copy_out(&self, at: u64, buf: &mut [u8]) -> Result<()> {
        let start = self.range(at, buf.len())?;
        // SAFETY: the range is inside the mapping and no writer holds the
        // owning slot.
        unsafe { std::ptr::copy_nonoverlapping(self.base.add(start), buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    /// Caller must have exclusive access to the target range
    fn zero(&self, at: u64, len: usize) -> Result<()> {
        let start = self.range(at, len)?;
        // SAFETY: as for `copy_in`.
        unsafe { std::ptr::write_bytes(self.base.add(start), 0, len) };
        Ok(())
    }

    /// msync the range; needs no slot lock since it never reads through Rust
    fn flush(&self, at: u64, len: usize) -> Result<()> {
        let start = self.range(at, len)?;
        self.map.flush_range(start, len)?;
        Ok(())
    }

    fn read_header(&self, slot: u64) -> Result<Option<SlotHeader>> {
        let mut buf = [0u8; SLOT_HEADER_SIZE as usize];
        self.copy_out(slot, &mut buf)?;
        Ok(SlotHeader::decode(&buf))
    }

    fn write_header(&self, slot: u64, header: &SlotHeader) -> Result<()> {
        self.copy_in(slot, &header.encode())?;
        self.flush(slot, SLOT_HEADER_SIZE as usize)
    }
}

// =============================================================================
// Backend
// =============================================================================

/// A slot holding a live region
#[derive(Debug)]
struct LiveSlot {
    generation: u64,
    size: u64,
    capacity: u64,
    /// Guards the slot's bytes; `false` once the region is erased
    alive: RwLock<bool>,
}

impl LiveSlot {
    fn new(generation: u64, size: u64, capacity: u64) -> Arc<Self> {
        Arc::new(Self { generation, size, capacity, alive: RwLock::new(true) })
    }
}

struct Allocator {
    /// First byte past the last carved slot
    end: u64,
    /// Erased slots: offset -> capacity
    free: BTreeMap<u64, u64>,
    next_generation: u64,
}

pub struct PmemBackend {
    path: PathBuf,
    mapping: Mapping,
    capacity: u64,
    alloc: Mutex<Allocator>,
    live: RwLock<HashMap<u64, Arc<LiveSlot>>>,
    closed: AtomicBool,
}

impl PmemBackend {
    pub fn open(target: &TargetConfig) -> Result<Self> {
        let path = target.require_path()?.clone();

        if target.override_if_exists && path.exists() {
            std::fs::remove_file(&path)?;
        }
        let existed = path.exists();
        let file = if existed {
            OpenOptions::new().read(true).write(true).open(&path)?
        } else {
            let size = target.create_if_missing_with_size.ok_or_else(|| {
                StoreError::Config(format!(
                    "File {} does not exist but \"create_if_missing_with_size\" was not specified",
                    path.display()
                ))
            })?;
            if size < SUPERBLOCK_SIZE + SLOT_HEADER_SIZE {
                return Err(StoreError::Config(format!(
                    "\"create_if_missing_with_size\" must be at least {} bytes",
                    SUPERBLOCK_SIZE + SLOT_HEADER_SIZE
                )));
            }
            let file = OpenOptions::new().read(true).write(true).create_new(true).open(&path)?;
            file.set_len(size)?;
            file
        };

        let capacity = file.metadata()?.len();
        // SAFETY: the store file is owned by this backend for as long as the
        // mapping lives; after setup all access goes through `Mapping`.
        let mut map = unsafe { MmapMut::map_mut(&file)? };

        if existed {
            if capacity < SUPERBLOCK_SIZE {
                return Err(StoreError::BackendUnavailable(format!(
                    "{} is too small to be a pmdk store",
                    path.display()
                )));
            }
            check_superblock(&map[0..SUPERBLOCK_SIZE as usize])?;
        } else {
            map[0..SUPERBLOCK_SIZE as usize].copy_from_slice(&encode_superblock(capacity));
            map.flush_range(0, SUPERBLOCK_SIZE as usize)?;
        }

        let backend = Self {
            path,
            mapping: Mapping::new(map),
            capacity,
            alloc: Mutex::new(Allocator {
                end: SUPERBLOCK_SIZE,
                free: BTreeMap::new(),
                next_generation: 1,
            }),
            live: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        };
        if existed {
            backend.scan()?;
        }
        tracing::info!(
            path = %backend.path.display(),
            capacity,
            regions = backend.live.read().len(),
            "Opened pmdk store"
        );
        Ok(backend)
    }

    /// Rebuild the allocator and live set from slot headers
    fn scan(&self) -> Result<()> {
        let mut alloc = self.alloc.lock();
        let mut live = self.live.write();
        let mut pos = SUPERBLOCK_SIZE;
        while pos + SLOT_HEADER_SIZE <= self.capacity {
            let Some(header) = self.mapping.read_header(pos)? else {
                break;
            };
            let next = (pos + SLOT_HEADER_SIZE)
                .checked_add(header.capacity)
                .filter(|&next| next <= self.capacity);
            let Some(next) = next.filter(|_| header.size <= header.capacity) else {
                tracing::warn!(offset = pos, "Corrupt slot header in pmdk store, ignoring the rest");
                break;
            };
            match header.state {
                STATE_LIVE => {
                    live.insert(pos, LiveSlot::new(header.generation, header.size, header.capacity));
                }
                _ => {
                    alloc.free.insert(pos, header.capacity);
                }
            }
            alloc.next_generation = alloc.next_generation.max(header.generation.saturating_add(1));
            pos = next;
        }
        alloc.end = pos;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::BackendUnavailable(format!(
                "pmdk store {} destroyed",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Resolve a RegionID to its slot offset and live slot
    fn locate(&self, id: &RegionId) -> Result<(u64, Arc<LiveSlot>)> {
        self.ensure_open()?;
        let (slot, generation) = id.parts();
        match self.live.read().get(&slot) {
            Some(live) if live.generation == generation => Ok((slot, Arc::clone(live))),
            _ => Err(StoreError::UnknownRegion(id.to_string())),
        }
    }
}

impl Backend for PmemBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Pmdk
    }

    fn create(&self, size: u64) -> Result<RegionId> {
        self.ensure_open()?;
        let needed = size
            .checked_next_multiple_of(SLOT_ALIGN)
            .ok_or_else(|| StoreError::OutOfSpace(format!("cannot reserve {} bytes", size)))?;

        let (slot, header) = {
            let mut alloc = self.alloc.lock();
            let reused = alloc
                .free
                .iter()
                .find(|(_, &cap)| cap >= needed)
                .map(|(&offset, &cap)| (offset, cap));
            let (slot, capacity) = match reused {
                Some((offset, cap)) => {
                    alloc.free.remove(&offset);
                    (offset, cap)
                }
                None => {
                    let slot = alloc.end;
                    let fits = slot
                        .checked_add(SLOT_HEADER_SIZE + needed)
                        .is_some_and(|end| end <= self.capacity);
                    if !fits {
                        return Err(StoreError::OutOfSpace(format!(
                            "pmdk store {} cannot fit a region of {} bytes",
                            self.path.display(),
                            size
                        )));
                    }
                    alloc.end = slot + SLOT_HEADER_SIZE + needed;
                    (slot, needed)
                }
            };
            let generation = alloc.next_generation;
            alloc.next_generation += 1;
            (slot, SlotHeader { state: STATE_LIVE, size, capacity, generation })
        };

        // The slot left the free list under the allocator lock, so nothing
        // else reaches it until it is published below. Reused slots still
        // hold the previous tenant's bytes.
        let prepared = self
            .mapping
            .zero(slot + SLOT_HEADER_SIZE, size as usize)
            .and_then(|()| self.mapping.write_header(slot, &header));
        if let Err(e) = prepared {
            self.alloc.lock().free.insert(slot, header.capacity);
            return Err(e);
        }
        self.live
            .write()
            .insert(slot, LiveSlot::new(header.generation, size, header.capacity));
        Ok(RegionId::from_parts(slot, header.generation))
    }

    fn write(&self, region: &RegionId, offset: u64, data: &[u8]) -> Result<()> {
        let (slot, live) = self.locate(region)?;
        check_bounds(offset, data.len() as u64, live.size)?;
        let alive = live.alive.write();
        if !*alive {
            return Err(StoreError::UnknownRegion(region.to_string()));
        }
        self.mapping.copy_in(slot + SLOT_HEADER_SIZE + offset, data)
    }

    fn read(&self, region: &RegionId, offset: u64, buf: &mut [u8]) -> Result<()> {
        let (slot, live) = self.locate(region)?;
        check_bounds(offset, buf.len() as u64, live.size)?;
        let alive = live.alive.read();
        if !*alive {
            return Err(StoreError::UnknownRegion(region.to_string()));
        }
        self.mapping.copy_out(slot + SLOT_HEADER_SIZE + offset, buf)
    }

    fn persist(&self, region: &RegionId, offset: u64, size: u64) -> Result<()> {
        let (slot, live) = self.locate(region)?;
        check_bounds(offset, size, live.size)?;
        if !*live.alive.read() {
            return Err(StoreError::UnknownRegion(region.to_string()));
        }
        if size == 0 {
            return Ok(());
        }
        // Writers to this or any other slot keep going while msync runs
        self.mapping.flush(slot + SLOT_HEADER_SIZE + offset, size as usize)
    }

    fn erase(&self, region: &RegionId) -> Result<()> {
        self.ensure_open()?;
        let (slot, generation) = region.parts();
        let live = {
            let mut live = self.live.write();
            let current = live.get(&slot).is_some_and(|l| l.generation == generation);
            if current {
                live.remove(&slot)
            } else {
                None
            }
        }
        .ok_or_else(|| StoreError::UnknownRegion(region.to_string()))?;

        {
            // Waits for in-flight reads and writes of this region
            let mut alive = live.alive.write();
            *alive = false;
            self.mapping.write_header(
                slot,
                &SlotHeader {
                    state: STATE_FREE,
                    size: 0,
                    capacity: live.capacity,
                    generation: live.generation,
                },
            )?;
        }
        self.alloc.lock().free.insert(slot, live.capacity);
        Ok(())
    }

    fn recover(&self) -> Result<Vec<(RegionId, u64)>> {
        Ok(self
            .live
            .read()
            .iter()
            .map(|(&slot, live)| (RegionId::from_parts(slot, live.generation), live.size))
            .collect())
    }

    fn destroy(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.live.write().clear();
        std::fs::remove_file(&self.path)?;
        tracing::info!(path = %self.path.display(), "Destroyed pmdk store");
        Ok(())
    }

    fn config(&self) -> Value {
        json!({
            "path": self.path.to_string_lossy(),
            "capacity": self.capacity,
        })
    }
}
