//! Region identifiers
//!
//! A `RegionId` is 16 opaque bytes. Clients only compare, copy and
//! serialize it; the backend that minted it may pack its own addressing
//! into the two 64-bit halves.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Size of a serialized RegionId
pub const REGION_ID_SIZE: usize = 16;

/// Opaque, fixed-size identifier of one region
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId([u8; REGION_ID_SIZE]);

impl RegionId {
    /// Build an id from two backend-defined words (little endian)
    pub fn from_parts(high: u64, low: u64) -> Self {
        let mut bytes = [0u8; REGION_ID_SIZE];
        bytes[0..8].copy_from_slice(&high.to_le_bytes());
        bytes[8..16].copy_from_slice(&low.to_le_bytes());
        Self(bytes)
    }

    /// Split back into the two words given to `from_parts`
    pub fn parts(&self) -> (u64, u64) {
        let mut high = [0u8; 8];
        let mut low = [0u8; 8];
        high.copy_from_slice(&self.0[0..8]);
        low.copy_from_slice(&self.0[8..16]);
        (u64::from_le_bytes(high), u64::from_le_bytes(low))
    }

    pub fn from_bytes(bytes: [u8; REGION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice that must be exactly 16 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; REGION_ID_SIZE] = bytes.try_into().map_err(|_| {
            StoreError::Serialization(format!(
                "RegionId must be {} bytes, got {}",
                REGION_ID_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    pub fn to_bytes(&self) -> [u8; REGION_ID_SIZE] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; REGION_ID_SIZE] {
        &self.0
    }

    /// Stable 64-bit digest, used for deterministic pool assignment
    pub fn digest(&self) -> u64 {
        let (high, low) = self.parts();
        (high ^ low.rotate_left(32)).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegionId({})", self)
    }
}

impl FromStr for RegionId {
    type Err = StoreError;

    /// Parse the 32-character hex form produced by `Display`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != REGION_ID_SIZE * 2 || !s.is_ascii() {
            return Err(StoreError::Serialization(format!(
                "RegionId must be {} hex characters, got {:?}",
                REGION_ID_SIZE * 2,
                s
            )));
        }
        let mut bytes = [0u8; REGION_ID_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16).map_err(|e| {
                StoreError::Serialization(format!("Invalid RegionId hex: {}", e))
            })?;
        }
        Ok(Self(bytes))
    }
}
