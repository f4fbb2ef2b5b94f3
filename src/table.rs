//! Region Table
//!
//! Maps RegionID → region metadata and is the single place that decides
//! whether a region exists and whether an access is in bounds.
//!
//! ## Concurrency
//! The map itself sits behind a read-mostly `RwLock`: lookups take the
//! read side, only `create`/`erase` take the write side, and neither is
//! held across a backend call. Each entry carries its own small lock for
//! durability bookkeeping, so operations on different regions never
//! contend beyond the map lookup.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, StoreError};
use crate::region::RegionId;

// =============================================================================
// RangeSet
// =============================================================================

/// Set of half-open byte ranges, kept merged
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RangeSet {
    /// start -> end, non-overlapping and non-adjacent
    ranges: BTreeMap<u64, u64>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Add `[start, end)`, merging with neighbours
    pub fn insert(&mut self, mut start: u64, mut end: u64) {
        if start >= end {
            return;
        }
        // Left neighbour that reaches into (or touches) the new range
        if let Some((&s, &e)) = self.ranges.range(..=start).next_back() {
            if e >= start {
                start = s;
                end = end.max(e);
                self.ranges.remove(&s);
            }
        }
        let absorbed: Vec<(u64, u64)> = self
            .ranges
            .range(start..=end)
            .map(|(&s, &e)| (s, e))
            .collect();
        for (s, e) in absorbed {
            end = end.max(e);
            self.ranges.remove(&s);
        }
        self.ranges.insert(start, end);
    }

    /// Remove `[start, end)`, splitting ranges that straddle it
    pub fn remove(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        let mut keep = Vec::new();
        let hit: Vec<(u64, u64)> = self
            .ranges
            .range(..end)
            .rev()
            .take_while(|(_, &e)| e > start)
            .map(|(&s, &e)| (s, e))
            .collect();
        for (s, e) in hit {
            self.ranges.remove(&s);
            if s < start {
                keep.push((s, start));
            }
            if e > end {
                keep.push((end, e));
            }
        }
        for (s, e) in keep {
            self.ranges.insert(s, e);
        }
    }

    /// Whether every byte of `[start, end)` is in the set
    pub fn covers(&self, start: u64, end: u64) -> bool {
        if start >= end {
            return true;
        }
        match self.ranges.range(..=start).next_back() {
            Some((_, &e)) => e >= end,
            None => false,
        }
    }
}

// =============================================================================
// RegionEntry
// =============================================================================

/// Metadata for one live region
#[derive(Debug)]
pub struct RegionEntry {
    id: RegionId,
    size: u64,
    /// `None` on volatile backends, where every write counts as persisted
    persisted: Option<Mutex<RangeSet>>,
}

impl RegionEntry {
    fn new(id: RegionId, size: u64, persistent: bool, fully_persisted: bool) -> Self {
        let persisted = persistent.then(|| {
            let mut set = RangeSet::new();
            if fully_persisted {
                set.insert(0, size);
            }
            Mutex::new(set)
        });
        Self { id, size, persisted }
    }

    pub fn id(&self) -> &RegionId {
        &self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reject any access that does not lie within `[0, size)`
    pub fn check_range(&self, offset: u64, len: u64) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(StoreError::out_of_range(offset, len, self.size)),
        }
    }

    /// Record that `[offset, offset + len)` now holds unpersisted bytes
    pub fn mark_written(&self, offset: u64, len: u64) {
        if let Some(set) = &self.persisted {
            set.lock().remove(offset, offset + len);
        }
    }

    /// Record that `[offset, offset + len)` is durable
    pub fn mark_persisted(&self, offset: u64, len: u64) {
        if let Some(set) = &self.persisted {
            set.lock().insert(offset, offset + len);
        }
    }

    /// Whether `[offset, offset + len)` is known durable
    pub fn is_persisted(&self, offset: u64, len: u64) -> bool {
        match &self.persisted {
            Some(set) => set.lock().covers(offset, offset + len),
            None => true,
        }
    }
}

// =============================================================================
// RegionTable
// =============================================================================

/// Owner of all region metadata for one provider
pub struct RegionTable {
    regions: RwLock<HashMap<RegionId, Arc<RegionEntry>>>,
    persistent: bool,
}

impl RegionTable {
    pub fn new(persistent: bool) -> Self {
        Self {
            regions: RwLock::new(HashMap::new()),
            persistent,
        }
    }

    /// Register a freshly created region (nothing persisted yet)
    pub fn insert(&self, id: RegionId, size: u64) -> Arc<RegionEntry> {
        self.insert_entry(RegionEntry::new(id, size, self.persistent, false))
    }

    /// Register a region found on disk at startup (fully persisted)
    pub fn insert_recovered(&self, id: RegionId, size: u64) -> Arc<RegionEntry> {
        self.insert_entry(RegionEntry::new(id, size, self.persistent, true))
    }

    fn insert_entry(&self, entry: RegionEntry) -> Arc<RegionEntry> {
        let entry = Arc::new(entry);
        self.regions.write().insert(entry.id, Arc::clone(&entry));
        entry
    }

    /// Resolve a RegionID, failing with `UnknownRegion`
    pub fn lookup(&self, id: &RegionId) -> Result<Arc<RegionEntry>> {
        self.regions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownRegion(id.to_string()))
    }

    /// Drop a region's entry, returning it so the caller can release storage
    pub fn remove(&self, id: &RegionId) -> Result<Arc<RegionEntry>> {
        self.regions
            .write()
            .remove(id)
            .ok_or_else(|| StoreError::UnknownRegion(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.regions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.read().is_empty()
    }

    pub fn clear(&self) {
        self.regions.write().clear();
    }
}
