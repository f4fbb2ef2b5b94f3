//! Asynchronous requests
//!
//! An [`AsyncRequest`] is a write-once result cell. The operation that
//! backs it runs on a [`WorkerPool`] thread and completes the cell exactly
//! once; any number of `wait()` calls then observe that same outcome.
//! There is no cancellation: dropping a request does not stop the work.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::{Result, StoreError};
use crate::region::RegionId;

// =============================================================================
// AsyncRequest
// =============================================================================

struct Cell<T> {
    outcome: Mutex<Option<Result<T>>>,
    done: Condvar,
}

/// Handle on an in-flight operation
pub struct AsyncRequest<T> {
    cell: Arc<Cell<T>>,
}

/// Request whose successful outcome is a new RegionID
pub type AsyncCreateRequest = AsyncRequest<RegionId>;

/// Completion side of an [`AsyncRequest`]
pub struct Completion<T> {
    cell: Arc<Cell<T>>,
}

impl<T: Clone> AsyncRequest<T> {
    /// A pending request and the handle that completes it
    pub fn pending() -> (Self, Completion<T>) {
        let cell = Arc::new(Cell { outcome: Mutex::new(None), done: Condvar::new() });
        (Self { cell: Arc::clone(&cell) }, Completion { cell })
    }

    /// A request that is already in its terminal state
    pub fn ready(outcome: Result<T>) -> Self {
        let (request, completion) = Self::pending();
        completion.complete(outcome);
        request
    }

    /// Block until the operation finishes and return its outcome
    ///
    /// Calling this again returns the same outcome.
    pub fn wait(&self) -> Result<T> {
        let mut outcome = self.cell.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.cell.done.wait(&mut outcome);
        }
    }

    /// Whether the operation has finished, without blocking
    pub fn test(&self) -> bool {
        self.cell.outcome.lock().is_some()
    }

    /// Whether the operation finished successfully, without blocking
    pub fn completed(&self) -> bool {
        matches!(self.cell.outcome.lock().as_ref(), Some(Ok(_)))
    }
}

impl<T> Clone for AsyncRequest<T> {
    fn clone(&self) -> Self {
        Self { cell: Arc::clone(&self.cell) }
    }
}

impl<T> Completion<T> {
    /// Store the terminal outcome; later calls are ignored
    pub fn complete(self, outcome: Result<T>) {
        let mut slot = self.cell.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.cell.done.notify_all();
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        // Completion consumed by `complete` leaves the cell set; a completion
        // dropped unfinished (worker panic) must not strand waiters.
        let mut slot = self.cell.outcome.lock();
        if slot.is_none() {
            *slot = Some(Err(StoreError::Transfer("operation abandoned before completion".to_string())));
            self.cell.done.notify_all();
        }
    }
}

// =============================================================================
// WorkerPool
// =============================================================================

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of threads running submitted operations in FIFO order
pub struct WorkerPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(name: &str, threads: usize) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let workers = (0..threads.max(1))
            .filter_map(|i| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(format!("{}-{}", name, i))
                    .spawn(move || {
                        for job in rx.iter() {
                            job();
                        }
                    })
                    .map_err(|e| tracing::warn!("Failed to spawn worker {}-{}: {}", name, i, e))
                    .ok()
            })
            .collect();
        Self { jobs: Some(tx), workers }
    }

    /// Run `op` on a worker and return a request for its outcome
    pub fn submit<T, F>(&self, op: F) -> AsyncRequest<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (request, completion) = AsyncRequest::pending();
        let job: Job = Box::new(move || completion.complete(op()));
        match &self.jobs {
            Some(tx) if !self.workers.is_empty() => {
                if let Err(rejected) = tx.send(job) {
                    // Channel closed: run inline so the request still completes
                    (rejected.into_inner())();
                }
            }
            _ => job(),
        }
        request
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.jobs.take();
        let current = std::thread::current().id();
        for worker in self.workers.drain(..) {
            // The last handle may be dropped by a job running on a worker
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }
}
