//! Command definitions
//!
//! The operation set a provider serves, as sent by clients.

use serde::{Deserialize, Serialize};

use crate::region::RegionId;

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Create = 0x01,
    Write = 0x02,
    Read = 0x03,
    CreateAndWrite = 0x04,
    Persist = 0x05,
    Erase = 0x06,
    GetConfig = 0x07,
}

/// How a write's bytes reach the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Carried in the command itself
    Inline(Vec<u8>),
    /// Pulled by the provider from the caller's exposed buffer
    Bulk { size: u64 },
}

impl Payload {
    pub fn len(&self) -> u64 {
        match self {
            Payload::Inline(data) => data.len() as u64,
            Payload::Bulk { size } => *size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a read's bytes reach the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadMode {
    /// Returned in the reply
    Eager,
    /// Pushed by the provider into the caller's exposed buffer
    Bulk,
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Allocate a region of `size` bytes
    Create { size: u64 },

    /// Write at `offset`, optionally persisting the written range
    Write {
        region: RegionId,
        offset: u64,
        payload: Payload,
        persist: bool,
    },

    /// Read `size` bytes at `offset`
    Read {
        region: RegionId,
        offset: u64,
        size: u64,
        mode: ReadMode,
    },

    /// Allocate a region exactly fitting the payload and write it
    CreateAndWrite { payload: Payload, persist: bool },

    /// Make a range durable
    Persist { region: RegionId, offset: u64, size: u64 },

    /// Release a region
    Erase { region: RegionId },

    /// Dump the provider configuration as JSON
    GetConfig,
}

impl Command {
    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Create { .. } => CommandType::Create,
            Command::Write { .. } => CommandType::Write,
            Command::Read { .. } => CommandType::Read,
            Command::CreateAndWrite { .. } => CommandType::CreateAndWrite,
            Command::Persist { .. } => CommandType::Persist,
            Command::Erase { .. } => CommandType::Erase,
            Command::GetConfig => CommandType::GetConfig,
        }
    }

    /// Bytes the provider must pull from the caller's exposed buffer
    pub fn bulk_pull_size(&self) -> Option<u64> {
        match self {
            Command::Write { payload: Payload::Bulk { size }, .. }
            | Command::CreateAndWrite { payload: Payload::Bulk { size }, .. } => Some(*size),
            _ => None,
        }
    }

    /// Bytes the provider will push into the caller's exposed buffer
    pub fn bulk_push_size(&self) -> Option<u64> {
        match self {
            Command::Read { size, mode: ReadMode::Bulk, .. } => Some(*size),
            _ => None,
        }
    }
}
