//! Pipelined transfer manager
//!
//! ## Chunk schedule
//! Chunk `i` of a transfer is `min(remaining, capacity(k))` bytes, where
//! `capacity(k)` is the size of buffer `k` of the pool and `n` is the
//! number of buffers per pool. The first `n - 1` chunks use `k = i`, so
//! small transfers touch only the small buffers. The tail then alternates
//! between the two largest buffers (`n - 1`, `n - 2`, `n - 1`, ...), so two
//! consecutive tail chunks never wait on the same buffer.
//!
//! ## Stages
//! ```text
//!   producer (calling thread)          consumer (scoped thread)
//!   ─────────────────────────          ────────────────────────
//!   acquire buffer for chunk i
//!   stage 1 (bulk pull / read)  ──►    stage 2 (write / bulk push)
//!   acquire buffer for chunk i+1       release buffer i
//!   stage 1 ...                 ──►    stage 2 ...
//! ```
//! Chunk `i+1`'s first stage overlaps chunk `i`'s second stage whenever
//! the pool has another buffer that fits. With two or more buffers per
//! pool that holds for every pair of consecutive chunks; with a single
//! buffer the two threads take turns.
//!
//! ## Failure
//! The first error from either stage is recorded and reported for the
//! whole transfer. A stage 1 failure stops the producer; chunks it already
//! staged still finish stage 2. A stage 2 failure makes the consumer drop
//! every chunk still queued. Either way every buffer goes back to its pool,
//! and chunks that already reached the backend stay written.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::bounded;
use parking_lot::Mutex;
use serde_json::Value;

use super::pool::{BufferPool, PoolSet, PooledBuffer};
use super::{Transfer, TransferManager};
use crate::backend::Backend;
use crate::config::{PipelineConfig, TransferManagerConfig};
use crate::error::{Result, StoreError};

pub struct PipelineTransferManager {
    config: PipelineConfig,
    pools: PoolSet,
}

/// First error seen by either stage
#[derive(Default)]
struct Abort {
    raised: AtomicBool,
    first: Mutex<Option<StoreError>>,
}

impl Abort {
    fn raise(&self, err: StoreError) {
        let mut first = self.first.lock();
        if first.is_none() {
            *first = Some(err);
        }
        self.raised.store(true, Ordering::Release);
    }

    fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    fn into_result(self) -> Result<()> {
        match self.first.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl PipelineTransferManager {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let pools = PoolSet::new(&config)?;
        tracing::debug!(
            num_pools = config.num_pools,
            num_buffers_per_pool = config.num_buffers_per_pool,
            first_buffer_size = config.first_buffer_size,
            buffer_size_multiplier = config.buffer_size_multiplier,
            "Built pipeline buffer pools"
        );
        Ok(Self { config, pools })
    }

    pub fn pools(&self) -> &PoolSet {
        &self.pools
    }

    /// `(offset within the transfer, length)` of every chunk
    pub fn schedule(&self, size: u64) -> Vec<(u64, usize)> {
        let Some(pool) = self.pools.pool(0) else {
            return Vec::new();
        };
        let last = pool.num_buffers() - 1;
        let mut chunks = Vec::new();
        let mut done = 0u64;
        while done < size {
            let cap = pool.capacity(chunk_buffer(chunks.len(), last)) as u64;
            let len = cap.min(size - done);
            chunks.push((done, len as usize));
            done += len;
        }
        chunks
    }

    fn run<S1, S2>(&self, pool: &BufferPool, size: u64, stage1: S1, stage2: S2) -> Result<()>
    where
        S1: Fn(u64, &mut [u8]) -> Result<()>,
        S2: Fn(u64, &[u8]) -> Result<()> + Sync,
    {
        let chunks = self.schedule(size);
        tracing::trace!(pool = pool.index(), size, chunks = chunks.len(), "Pipelined transfer");

        if let [(offset, len)] = chunks[..] {
            let mut buf = pool.acquire(len)?;
            stage1(offset, &mut buf[..len])?;
            return stage2(offset, &buf[..len]);
        }

        let abort = Abort::default();
        std::thread::scope(|scope| {
            let (tx, rx) = bounded::<(u64, usize, PooledBuffer<'_>)>(pool.num_buffers());

            let (abort_ref, stage2_ref) = (&abort, &stage2);
            let consumer = scope.spawn(move || {
                let mut failed = false;
                for (offset, len, buf) in rx.iter() {
                    if failed {
                        continue;
                    }
                    if let Err(e) = stage2_ref(offset, &buf[..len]) {
                        abort_ref.raise(e);
                        failed = true;
                    }
                }
            });

            for &(offset, len) in &chunks {
                if abort.is_raised() {
                    break;
                }
                let mut buf = match pool.acquire(len) {
                    Ok(buf) => buf,
                    Err(e) => {
                        abort.raise(e);
                        break;
                    }
                };
                if let Err(e) = stage1(offset, &mut buf[..len]) {
                    abort.raise(e);
                    break;
                }
                if tx.send((offset, len, buf)).is_err() {
                    break;
                }
            }
            drop(tx);

            if consumer.join().is_err() {
                abort.raise(StoreError::Transfer("pipeline stage panicked".to_string()));
            }
        });
        abort.into_result()
    }
}

/// Buffer index sizing chunk `i` when `last` is the largest index
fn chunk_buffer(i: usize, last: usize) -> usize {
    if i < last {
        return i;
    }
    if last > 0 && (i - last) % 2 == 1 {
        last - 1
    } else {
        last
    }
}

impl TransferManager for PipelineTransferManager {
    fn name(&self) -> &'static str {
        TransferManagerConfig::PIPELINE_NAME
    }

    fn config(&self) -> Value {
        TransferManagerConfig::Pipeline(self.config).to_json()["config"].clone()
    }

    fn pull(&self, backend: &dyn Backend, transfer: &Transfer<'_>) -> Result<()> {
        transfer.check_bulk_bounds()?;
        let pool = self.pools.select(transfer.region);
        self.run(
            pool,
            transfer.size,
            |offset, buf| transfer.bulk.pull(transfer.bulk_offset + offset, buf),
            |offset, buf| backend.write(transfer.region, transfer.region_offset + offset, buf),
        )
    }

    fn push(&self, backend: &dyn Backend, transfer: &Transfer<'_>) -> Result<()> {
        transfer.check_bulk_bounds()?;
        let pool = self.pools.select(transfer.region);
        self.run(
            pool,
            transfer.size,
            |offset, buf| backend.read(transfer.region, transfer.region_offset + offset, buf),
            |offset, buf| transfer.bulk.push(transfer.bulk_offset + offset, buf),
        )
    }
}
