//! Response definitions
//!
//! A response is a status byte plus a body. On success the body is the
//! bincode-encoded [`Reply`]; on failure it is the error message, and the
//! status byte says which error it was.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::region::RegionId;

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    UnknownRegion = 0x01,
    OutOfRange = 0x02,
    OutOfSpace = 0x03,
    Io = 0x04,
    BackendUnavailable = 0x05,
    Config = 0x06,
    Transfer = 0x07,
    Serialization = 0x08,
    Network = 0x09,
    Protocol = 0x0A,
}

impl Status {
    pub fn from_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            0x00 => Status::Ok,
            0x01 => Status::UnknownRegion,
            0x02 => Status::OutOfRange,
            0x03 => Status::OutOfSpace,
            0x04 => Status::Io,
            0x05 => Status::BackendUnavailable,
            0x06 => Status::Config,
            0x07 => Status::Transfer,
            0x08 => Status::Serialization,
            0x09 => Status::Network,
            0x0A => Status::Protocol,
            _ => {
                return Err(StoreError::Protocol(format!(
                    "Unknown response status: 0x{:02x}",
                    byte
                )))
            }
        })
    }
}

/// Successful outcome of a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// Nothing to return (write, persist, erase, bulk read)
    Done,
    /// A newly created region
    Region(RegionId),
    /// Bytes of an eager read
    Data(Vec<u8>),
    /// Provider configuration as JSON
    Config(String),
}

impl Reply {
    pub fn into_region(self) -> Result<RegionId> {
        match self {
            Reply::Region(id) => Ok(id),
            other => Err(unexpected("Region", &other)),
        }
    }

    pub fn into_data(self) -> Result<Vec<u8>> {
        match self {
            Reply::Data(data) => Ok(data),
            other => Err(unexpected("Data", &other)),
        }
    }

    pub fn into_config(self) -> Result<String> {
        match self {
            Reply::Config(json) => Ok(json),
            other => Err(unexpected("Config", &other)),
        }
    }

    pub fn into_done(self) -> Result<()> {
        match self {
            Reply::Done => Ok(()),
            other => Err(unexpected("Done", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &Reply) -> StoreError {
    StoreError::Protocol(format!("expected {} reply, got {:?}", expected, got))
}

/// A response to send to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code
    pub status: Status,

    /// Reply body on success, error message otherwise
    pub payload: Vec<u8>,
}

impl Response {
    /// Create an OK response carrying a raw body
    pub fn ok(payload: Vec<u8>) -> Self {
        Self { status: Status::Ok, payload }
    }

    /// Create an error response from a StoreError
    pub fn error(err: &StoreError) -> Self {
        // status_code covers every Status variant except Ok
        let status = Status::from_byte(err.status_code()).unwrap_or(Status::Protocol);
        Self { status, payload: err.message().into_bytes() }
    }

    /// Encode an operation outcome
    pub fn from_result(result: Result<Reply>) -> Self {
        match result.and_then(|reply| Ok(bincode::serialize(&reply)?)) {
            Ok(body) => Self::ok(body),
            Err(e) => Self::error(&e),
        }
    }

    /// Turn a response back into the error it carries, if any
    pub fn into_body(self) -> Result<Vec<u8>> {
        match self.status {
            Status::Ok => Ok(self.payload),
            status => Err(StoreError::from_status(
                status as u8,
                String::from_utf8_lossy(&self.payload).into_owned(),
            )),
        }
    }

    /// Decode the operation outcome
    pub fn into_reply(self) -> Result<Reply> {
        let body = self.into_body()?;
        Ok(bincode::deserialize(&body)?)
    }
}
