//! # RegionStore
//!
//! A network-attached region store with:
//! - Pluggable backends (volatile memory, async file I/O, persistent memory)
//! - Fixed-size regions addressed by opaque 16-byte RegionIDs
//! - Eager (inline) or bulk transfer chosen per payload size
//! - Pipelined bulk transfers staged through pools of geometric buffers
//! - Synchronous and asynchronous client operations
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 TargetHandle (client side)                  │
//! │          eager/bulk policy · async WorkerPool               │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  Transport (local or TCP)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Provider                             │
//! │        command dispatch · durability bookkeeping            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────────┐
//!   │ RegionTable │          │ TransferManager │
//!   │  (RwLock)   │          │ default/pipeline│
//!   └─────────────┘          └───────┬─────────┘
//!                                    │
//!                                    ▼
//!                  ┌──────────────────────────────────┐
//!                  │  Backend: memory · abtio · pmdk  │
//!                  └──────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod region;

pub mod backend;
pub mod client;
pub mod network;
pub mod policy;
pub mod protocol;
pub mod provider;
pub mod request;
pub mod table;
pub mod transfer;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use client::{Client, TargetHandle};
pub use config::{PipelineConfig, ProviderConfig, ServerConfig, TargetConfig};
pub use error::{Result, StoreError};
pub use provider::Provider;
pub use region::RegionId;
pub use request::{AsyncCreateRequest, AsyncRequest};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of RegionStore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
