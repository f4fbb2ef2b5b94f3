//! Buffer pools for the pipeline transfer manager
//!
//! A pool owns `num_buffers_per_pool` buffers; buffer `k` has capacity
//! `first_buffer_size * buffer_size_multiplier^k` and never changes size.
//!
//! ## Acquisition
//! Waiters are served strictly in arrival order: a caller takes a ticket,
//! and only the holder of the oldest ticket may check a buffer out. It gets
//! the smallest free buffer that fits its chunk. A checked-out buffer is
//! returned when its [`PooledBuffer`] guard is dropped, which wakes the
//! waiters so the new head of the queue can try again.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex};

use crate::config::{PipelineConfig, PoolAssignment};
use crate::error::{Result, StoreError};
use crate::region::RegionId;

struct PoolState {
    /// `None` while the buffer is checked out
    slots: Vec<Option<Vec<u8>>>,
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

pub struct BufferPool {
    index: usize,
    capacities: Vec<usize>,
    state: Mutex<PoolState>,
    returned: Condvar,
}

impl BufferPool {
    pub fn new(index: usize, config: &PipelineConfig) -> Result<Self> {
        let capacities = (0..config.num_buffers_per_pool)
            .map(|k| {
                config.buffer_size(k).ok_or_else(|| {
                    StoreError::Config(format!("pipeline buffer {} size overflows", k))
                })
            })
            .collect::<Result<Vec<usize>>>()?;
        let slots = capacities.iter().map(|&cap| Some(vec![0u8; cap])).collect();
        Ok(Self {
            index,
            capacities,
            state: Mutex::new(PoolState { slots, waiters: VecDeque::new(), next_ticket: 0 }),
            returned: Condvar::new(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Capacity of buffer `k`
    pub fn capacity(&self, k: usize) -> usize {
        self.capacities[k]
    }

    pub fn num_buffers(&self) -> usize {
        self.capacities.len()
    }

    pub fn largest(&self) -> usize {
        self.capacities.last().copied().unwrap_or(0)
    }

    /// Buffers currently checked in
    pub fn available(&self) -> usize {
        self.state.lock().slots.iter().filter(|s| s.is_some()).count()
    }

    /// Callers queued in `acquire`, including the one being served
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Check out the smallest free buffer holding at least `min_capacity`
    /// bytes, blocking until one is returned if none is free
    pub fn acquire(&self, min_capacity: usize) -> Result<PooledBuffer<'_>> {
        if min_capacity > self.largest() {
            return Err(StoreError::Transfer(format!(
                "chunk of {} bytes exceeds largest buffer ({}) of pool {}",
                min_capacity,
                self.largest(),
                self.index
            )));
        }
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);

        loop {
            if state.waiters.front() == Some(&ticket) {
                let fit = (0..self.capacities.len())
                    .find(|&k| self.capacities[k] >= min_capacity && state.slots[k].is_some());
                if let Some(k) = fit {
                    if let Some(buf) = state.slots[k].take() {
                        state.waiters.pop_front();
                        // Let the next ticket holder look at what is left
                        self.returned.notify_all();
                        return Ok(PooledBuffer { pool: self, slot: k, buf: Some(buf) });
                    }
                }
            }
            self.returned.wait(&mut state);
        }
    }

    fn release(&self, slot: usize, buf: Vec<u8>) {
        let mut state = self.state.lock();
        state.slots[slot] = Some(buf);
        drop(state);
        self.returned.notify_all();
    }
}

/// A buffer checked out of a [`BufferPool`]; returned on drop
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    slot: usize,
    buf: Option<Vec<u8>>,
}

impl PooledBuffer<'_> {
    /// Index of the buffer within its pool
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(self.slot, buf);
        }
    }
}

/// All pools of one pipeline transfer manager
pub struct PoolSet {
    pools: Vec<BufferPool>,
    assignment: PoolAssignment,
}

impl PoolSet {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let pools = (0..config.num_pools)
            .map(|i| BufferPool::new(i, config))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { pools, assignment: config.pool_assignment })
    }

    /// The pool serving operations on `region`
    pub fn select(&self, region: &RegionId) -> &BufferPool {
        let index = match self.assignment {
            PoolAssignment::ByRegion => (region.digest() % self.pools.len() as u64) as usize,
            PoolAssignment::Fixed(i) => i,
        };
        &self.pools[index]
    }

    pub fn pool(&self, index: usize) -> Option<&BufferPool> {
        self.pools.get(index)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
