//! Error types for RegionStore
//!
//! Provides a unified error type for all operations. Every variant has a
//! stable wire status so that a remote caller sees the same variant it
//! would have seen in-process.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for RegionStore operations
///
/// `Clone` so an async request can hand out the same terminal error on
/// every `wait()`; I/O errors are shared behind an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // Region Errors
    // -------------------------------------------------------------------------
    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    #[error("Out of space: {0}")]
    OutOfSpace(String),

    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Transfer Errors
    // -------------------------------------------------------------------------
    #[error("Transfer error: {0}")]
    Transfer(String),

    // -------------------------------------------------------------------------
    // Serialization / Network Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(Arc::new(err))
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl StoreError {
    /// Build an `OutOfRange` error for an access of `size` bytes at `offset`
    pub fn out_of_range(offset: u64, size: u64, region_size: u64) -> Self {
        StoreError::OutOfRange(format!(
            "access [{}, {}) exceeds region of {} bytes",
            offset,
            offset.saturating_add(size),
            region_size
        ))
    }

    /// Stable one-byte status code used on the wire (0x00 is success)
    pub fn status_code(&self) -> u8 {
        match self {
            StoreError::UnknownRegion(_) => 0x01,
            StoreError::OutOfRange(_) => 0x02,
            StoreError::OutOfSpace(_) => 0x03,
            StoreError::Io(_) => 0x04,
            StoreError::BackendUnavailable(_) => 0x05,
            StoreError::Config(_) => 0x06,
            StoreError::Transfer(_) => 0x07,
            StoreError::Serialization(_) => 0x08,
            StoreError::Network(_) => 0x09,
            StoreError::Protocol(_) => 0x0A,
        }
    }

    /// Message carried on the wire, without the variant prefix
    pub fn message(&self) -> String {
        match self {
            StoreError::UnknownRegion(m)
            | StoreError::OutOfRange(m)
            | StoreError::OutOfSpace(m)
            | StoreError::BackendUnavailable(m)
            | StoreError::Config(m)
            | StoreError::Transfer(m)
            | StoreError::Serialization(m)
            | StoreError::Network(m)
            | StoreError::Protocol(m) => m.clone(),
            StoreError::Io(e) => e.to_string(),
        }
    }

    /// Rebuild an error from its wire status and message
    pub fn from_status(code: u8, message: String) -> Self {
        match code {
            0x01 => StoreError::UnknownRegion(message),
            0x02 => StoreError::OutOfRange(message),
            0x03 => StoreError::OutOfSpace(message),
            0x04 => StoreError::Io(Arc::new(std::io::Error::other(message))),
            0x05 => StoreError::BackendUnavailable(message),
            0x06 => StoreError::Config(message),
            0x07 => StoreError::Transfer(message),
            0x08 => StoreError::Serialization(message),
            0x09 => StoreError::Network(message),
            _ => StoreError::Protocol(message),
        }
    }
}
