//! File-backed backend with an internal asynchronous I/O engine
//!
//! ## File Layout
//! ```text
//! ┌──────────────┬────────┬──────────────┬────────┬──────────────┬─────
//! │ Superblock   │ Header │ Region data  │ Header │ Region data  │ ...
//! │ (64 bytes)   │        │              │        │              │
//! └──────────────┴────────┴──────────────┴────────┴──────────────┴─────
//! ```
//!
//! Regions are bump-allocated at the end of the file; every header and
//! every region start is aligned to the configured `alignment`. Erased
//! regions are flagged free in their header and their space is not
//! reclaimed. The RegionID is `(header offset, size)`.
//!
//! ## I/O Engine
//! Reads and writes are split into segments and handed to a small set of
//! worker threads over a crossbeam channel. The calling thread submits all
//! segments and then waits for each completion, so a large write keeps
//! `io_threads` requests in flight at once while callers still see a
//! plain synchronous call.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};

use super::{check_bounds, Backend, BackendKind};
use crate::config::TargetConfig;
use crate::error::{Result, StoreError};
use crate::region::RegionId;

const SUPERBLOCK_MAGIC: &[u8; 8] = b"RGNABTIO";
const SUPERBLOCK_VERSION: u32 = 1;
const SUPERBLOCK_SIZE: u64 = 64;

const HEADER_MAGIC: u32 = 0x5247_4E31;
const HEADER_SIZE: u64 = 16;
const STATE_LIVE: u32 = 1;
const STATE_FREE: u32 = 2;

/// Largest piece handed to a single I/O worker
const SEGMENT_SIZE: usize = 1024 * 1024;

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

// =============================================================================
// I/O Engine
// =============================================================================

enum IoJob {
    Write {
        offset: u64,
        data: Vec<u8>,
        done: Sender<std::io::Result<()>>,
    },
    Read {
        offset: u64,
        len: usize,
        done: Sender<std::io::Result<Vec<u8>>>,
    },
    Sync {
        done: Sender<std::io::Result<()>>,
    },
}

struct IoEngine {
    jobs: Option<Sender<IoJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl IoEngine {
    fn start(file: Arc<File>, threads: usize) -> Self {
        let (tx, rx) = unbounded::<IoJob>();
        let workers = (0..threads)
            .map(|_| {
                let rx: Receiver<IoJob> = rx.clone();
                let file = Arc::clone(&file);
                std::thread::spawn(move || {
                    for job in rx.iter() {
                        // A dropped completion receiver means the caller
                        // already gave up on this operation.
                        match job {
                            IoJob::Write { offset, data, done } => {
                                let _ = done.send(file.write_all_at(&data, offset));
                            }
                            IoJob::Read { offset, len, done } => {
                                let mut buf = vec![0u8; len];
                                let res = file.read_exact_at(&mut buf, offset).map(|_| buf);
                                let _ = done.send(res);
                            }
                            IoJob::Sync { done } => {
                                let _ = done.send(file.sync_data());
                            }
                        }
                    }
                })
            })
            .collect();
        Self { jobs: Some(tx), workers }
    }

    fn submit(&self, job: IoJob) -> Result<()> {
        self.jobs
            .as_ref()
            .and_then(|tx| tx.send(job).ok())
            .ok_or_else(|| StoreError::BackendUnavailable("I/O engine stopped".to_string()))
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut pending = Vec::new();
        for (i, piece) in data.chunks(SEGMENT_SIZE).enumerate() {
            let (done, wait) = bounded(1);
            self.submit(IoJob::Write {
                offset: offset + (i * SEGMENT_SIZE) as u64,
                data: piece.to_vec(),
                done,
            })?;
            pending.push(wait);
        }
        // Every segment is awaited before the first error is reported
        let mut first_err = None;
        for wait in pending {
            if let Err(e) = wait.recv().unwrap_or_else(|_| Err(engine_gone())) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), |e| Err(e.into()))
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        let mut pending = Vec::new();
        for (i, piece) in out.chunks(SEGMENT_SIZE).enumerate() {
            let (done, wait) = bounded(1);
            self.submit(IoJob::Read {
                offset: offset + (i * SEGMENT_SIZE) as u64,
                len: piece.len(),
                done,
            })?;
            pending.push(wait);
        }
        let mut first_err = None;
        for (piece, wait) in out.chunks_mut(SEGMENT_SIZE).zip(pending) {
            match wait.recv().unwrap_or_else(|_| Err(engine_gone())) {
                Ok(buf) => piece.copy_from_slice(&buf),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), |e| Err(e.into()))
    }

    fn sync(&self) -> Result<()> {
        let (done, wait) = bounded(1);
        self.submit(IoJob::Sync { done })?;
        wait.recv().unwrap_or_else(|_| Err(engine_gone()))?;
        Ok(())
    }
}

impl Drop for IoEngine {
    fn drop(&mut self) {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn engine_gone() -> std::io::Error {
    std::io::Error::other("I/O worker exited")
}

// =============================================================================
// Headers
// =============================================================================

fn encode_superblock(alignment: u64) -> [u8; SUPERBLOCK_SIZE as usize] {
    let mut sb = [0u8; SUPERBLOCK_SIZE as usize];
    sb[0..8].copy_from_slice(SUPERBLOCK_MAGIC);
    sb[8..12].copy_from_slice(&SUPERBLOCK_VERSION.to_le_bytes());
    sb[12..20].copy_from_slice(&alignment.to_le_bytes());
    let crc = crc32fast::hash(&sb[0..20]);
    sb[20..24].copy_from_slice(&crc.to_le_bytes());
    sb
}

/// Validate a superblock, returning the alignment it records
fn decode_superblock(sb: &[u8; SUPERBLOCK_SIZE as usize]) -> Result<u64> {
    if &sb[0..8] != SUPERBLOCK_MAGIC {
        return Err(StoreError::BackendUnavailable("not an abtio store (bad magic)".to_string()));
    }
    let stored_crc = u32::from_le_bytes([sb[20], sb[21], sb[22], sb[23]]);
    if crc32fast::hash(&sb[0..20]) != stored_crc {
        return Err(StoreError::BackendUnavailable("abtio superblock checksum mismatch".to_string()));
    }
    let version = u32::from_le_bytes([sb[8], sb[9], sb[10], sb[11]]);
    if version != SUPERBLOCK_VERSION {
        return Err(StoreError::BackendUnavailable(format!(
            "unsupported abtio store version {}",
            version
        )));
    }
    let mut alignment = [0u8; 8];
    alignment.copy_from_slice(&sb[12..20]);
    Ok(u64::from_le_bytes(alignment))
}

fn encode_header(state: u32, size: u64) -> [u8; HEADER_SIZE as usize] {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..4].copy_from_slice(&HEADER_MAGIC.to_le_bytes());
    header[4..8].copy_from_slice(&state.to_le_bytes());
    header[8..16].copy_from_slice(&size.to_le_bytes());
    header
}

/// Returns `(state, size)`, or `None` when no header lives here
fn decode_header(header: &[u8; HEADER_SIZE as usize]) -> Option<(u32, u64)> {
    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if magic != HEADER_MAGIC {
        return None;
    }
    let state = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let mut size = [0u8; 8];
    size.copy_from_slice(&header[8..16]);
    Some((state, u64::from_le_bytes(size)))
}

// =============================================================================
// Backend
// =============================================================================

pub struct AbtIoBackend {
    path: PathBuf,
    file: Arc<File>,
    engine: IoEngine,
    alignment: u64,
    io_threads: usize,
    /// Space reserved for a header, rounded up so region data is aligned
    header_span: u64,
    /// End of the allocated area; guards file growth
    end: Mutex<u64>,
    /// Live regions: header offset -> size
    live: RwLock<HashMap<u64, u64>>,
    closed: AtomicBool,
}

impl AbtIoBackend {
    pub fn open(target: &TargetConfig) -> Result<Self> {
        let path = target.require_path()?.clone();

        if target.override_if_exists && path.exists() {
            std::fs::remove_file(&path)?;
        }
        let existed = path.exists();
        if !existed && !target.create_if_missing {
            return Err(StoreError::Config(format!(
                "File {} does not exist and \"create_if_missing\" is not set",
                path.display()
            )));
        }

        let file = OpenOptions::new().read(true).write(true).create(!existed).open(&path)?;
        let mut alignment = target.alignment;
        if existed {
            let mut sb = [0u8; SUPERBLOCK_SIZE as usize];
            file.read_exact_at(&mut sb, 0)?;
            let stored = decode_superblock(&sb)?;
            if stored != alignment {
                tracing::warn!(
                    configured = alignment,
                    stored,
                    "abtio store was created with a different alignment, using the stored one"
                );
            }
            alignment = stored;
        } else {
            file.write_all_at(&encode_superblock(alignment), 0)?;
            file.sync_all()?;
        }

        let file = Arc::new(file);
        let engine = IoEngine::start(Arc::clone(&file), target.io_threads);
        let header_span = align_up(HEADER_SIZE, alignment);
        let data_start = align_up(SUPERBLOCK_SIZE, alignment);

        let backend = Self {
            path,
            file,
            engine,
            alignment,
            io_threads: target.io_threads,
            header_span,
            end: Mutex::new(data_start),
            live: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        };
        if existed {
            backend.scan()?;
        } else {
            backend.file.set_len(data_start)?;
        }
        tracing::info!(
            path = %backend.path.display(),
            alignment,
            io_threads = backend.io_threads,
            regions = backend.live.read().len(),
            "Opened abtio store"
        );
        Ok(backend)
    }

    /// Walk region headers from the start of the data area
    fn scan(&self) -> Result<()> {
        let file_len = self.file.metadata()?.len();
        let mut pos = align_up(SUPERBLOCK_SIZE, self.alignment);
        let mut live = self.live.write();
        while pos + HEADER_SIZE <= file_len {
            let mut header = [0u8; HEADER_SIZE as usize];
            self.file.read_exact_at(&mut header, pos)?;
            let Some((state, size)) = decode_header(&header) else {
                break;
            };
            let next = (pos + self.header_span)
                .checked_add(size)
                .and_then(|end| end.checked_next_multiple_of(self.alignment))
                .filter(|&next| next <= file_len);
            let Some(next) = next else {
                tracing::warn!(offset = pos, size, "Truncated region at end of abtio store, ignoring");
                break;
            };
            if state == STATE_LIVE {
                live.insert(pos, size);
            }
            pos = next;
        }
        *self.end.lock() = pos;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::BackendUnavailable(format!(
                "abtio store {} destroyed",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Resolve a RegionID to `(data offset, size)`
    fn locate(&self, id: &RegionId) -> Result<(u64, u64)> {
        self.ensure_open()?;
        let (header_offset, size) = id.parts();
        match self.live.read().get(&header_offset) {
            Some(&live_size) if live_size == size => Ok((header_offset + self.header_span, size)),
            _ => Err(StoreError::UnknownRegion(id.to_string())),
        }
    }
}

impl Backend for AbtIoBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::AbtIo
    }

    fn create(&self, size: u64) -> Result<RegionId> {
        self.ensure_open()?;
        let header_offset = {
            let mut end = self.end.lock();
            let header_offset = *end;
            let new_end = header_offset
                .checked_add(self.header_span)
                .and_then(|v| v.checked_add(size))
                .map(|v| align_up(v, self.alignment))
                .ok_or_else(|| StoreError::OutOfSpace(format!("cannot reserve {} bytes", size)))?;
            self.file.set_len(new_end)?;
            *end = new_end;
            header_offset
        };
        self.engine.write(header_offset, &encode_header(STATE_LIVE, size))?;
        self.live.write().insert(header_offset, size);
        Ok(RegionId::from_parts(header_offset, size))
    }

    fn write(&self, region: &RegionId, offset: u64, data: &[u8]) -> Result<()> {
        let (base, size) = self.locate(region)?;
        check_bounds(offset, data.len() as u64, size)?;
        self.engine.write(base + offset, data)
    }

    fn read(&self, region: &RegionId, offset: u64, buf: &mut [u8]) -> Result<()> {
        let (base, size) = self.locate(region)?;
        check_bounds(offset, buf.len() as u64, size)?;
        self.engine.read(base + offset, buf)
    }

    fn persist(&self, region: &RegionId, offset: u64, size: u64) -> Result<()> {
        let (_, region_size) = self.locate(region)?;
        check_bounds(offset, size, region_size)?;
        self.engine.sync()
    }

    fn erase(&self, region: &RegionId) -> Result<()> {
        let (base, size) = self.locate(region)?;
        let header_offset = base - self.header_span;
        if self.live.write().remove(&header_offset).is_none() {
            return Err(StoreError::UnknownRegion(region.to_string()));
        }
        self.engine.write(header_offset, &encode_header(STATE_FREE, size))
    }

    fn recover(&self) -> Result<Vec<(RegionId, u64)>> {
        Ok(self
            .live
            .read()
            .iter()
            .map(|(&offset, &size)| (RegionId::from_parts(offset, size), size))
            .collect())
    }

    fn destroy(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.live.write().clear();
        std::fs::remove_file(&self.path)?;
        tracing::info!(path = %self.path.display(), "Destroyed abtio store");
        Ok(())
    }

    fn config(&self) -> Value {
        json!({
            "path": self.path.to_string_lossy(),
            "alignment": self.alignment,
            "io_threads": self.io_threads,
        })
    }
}
