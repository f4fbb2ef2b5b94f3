//! Client Module
//!
//! ```text
//!   Client ──► TargetHandle ──► Transport ──► Provider
//!                  │               ├─ LocalTransport (same process)
//!                  │               └─ TcpTransport   (remote server)
//!                  └─ WorkerPool (async variants)
//! ```

mod target;
mod transport;

use std::sync::Arc;

pub use target::TargetHandle;
pub use transport::{LocalTransport, TcpTransport, Transport};

use crate::error::Result;
use crate::provider::Provider;
use crate::request::WorkerPool;

/// Threads serving asynchronous calls unless configured otherwise
pub const DEFAULT_CLIENT_THREADS: usize = 4;

/// Entry point for issuing operations against a provider
pub struct Client {
    transport: Arc<dyn Transport>,
    workers: Arc<WorkerPool>,
}

impl Client {
    pub fn with_transport(transport: Arc<dyn Transport>, threads: usize) -> Self {
        Self { transport, workers: Arc::new(WorkerPool::new("regionstore-client", threads)) }
    }

    /// Client for a provider living in this process
    pub fn local(provider: Arc<Provider>) -> Self {
        Self::with_transport(Arc::new(LocalTransport::new(provider)), DEFAULT_CLIENT_THREADS)
    }

    /// Client for a server at `addr`
    pub fn connect(addr: &str) -> Result<Self> {
        Ok(Self::with_transport(Arc::new(TcpTransport::connect(addr)?), DEFAULT_CLIENT_THREADS))
    }

    /// A fresh handle with default eager thresholds
    pub fn target(&self) -> TargetHandle {
        TargetHandle::new(Arc::clone(&self.transport), Arc::clone(&self.workers))
    }
}
