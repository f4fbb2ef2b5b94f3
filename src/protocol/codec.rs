//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! Every message is one frame:
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Kind (1) │ Len (4)  │         Body                │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//! `Len` is big-endian and counts only the body.
//!
//! ### Body by Frame Kind
//! - COMMAND   (client → server): bincode(Command)
//! - RESPONSE  (server → client): status (1) + bincode(Reply) or message
//! - BULK_PULL (server → client): offset (8) + len (4)
//! - BULK_DATA (client → server): status (1) + bytes or message
//! - BULK_PUSH (server → client): offset (8) + bytes
//! - BULK_ACK  (client → server): status (1) + message

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Command, Response, Status};
use crate::error::{Result, StoreError};

/// Header size: 1 byte kind + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum body size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Frame kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Command = 0x01,
    Response = 0x02,
    BulkPull = 0x03,
    BulkData = 0x04,
    BulkPush = 0x05,
    BulkAck = 0x06,
}

impl FrameKind {
    fn from_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            0x01 => FrameKind::Command,
            0x02 => FrameKind::Response,
            0x03 => FrameKind::BulkPull,
            0x04 => FrameKind::BulkData,
            0x05 => FrameKind::BulkPush,
            0x06 => FrameKind::BulkAck,
            _ => {
                return Err(StoreError::Protocol(format!(
                    "Unknown frame kind: 0x{:02x}",
                    byte
                )))
            }
        })
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Command(Command),
    Response(Response),
    /// Server asks for `len` bytes of the exposed buffer at `offset`
    BulkPull { offset: u64, len: u32 },
    /// Client answers a BulkPull
    BulkData(Response),
    /// Server hands over bytes to store at `offset` of the exposed buffer
    BulkPush { offset: u64, data: Vec<u8> },
    /// Client answers a BulkPush
    BulkAck(Response),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Command(_) => FrameKind::Command,
            Frame::Response(_) => FrameKind::Response,
            Frame::BulkPull { .. } => FrameKind::BulkPull,
            Frame::BulkData(_) => FrameKind::BulkData,
            Frame::BulkPush { .. } => FrameKind::BulkPush,
            Frame::BulkAck(_) => FrameKind::BulkAck,
        }
    }
}

// =============================================================================
// Frame Encoding/Decoding
// =============================================================================

/// Encode a frame to bytes
pub fn encode_frame(frame: &Frame) -> Result<Bytes> {
    let mut body = BytesMut::new();
    match frame {
        Frame::Command(command) => body.put_slice(&bincode::serialize(command)?),
        Frame::Response(response) | Frame::BulkData(response) | Frame::BulkAck(response) => {
            body.put_u8(response.status as u8);
            body.put_slice(&response.payload);
        }
        Frame::BulkPull { offset, len } => {
            body.put_u64(*offset);
            body.put_u32(*len);
        }
        Frame::BulkPush { offset, data } => {
            body.put_u64(*offset);
            body.put_slice(data);
        }
    }

    if body.len() > MAX_PAYLOAD_SIZE as usize {
        return Err(StoreError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            body.len(),
            MAX_PAYLOAD_SIZE
        )));
    }

    let mut message = BytesMut::with_capacity(HEADER_SIZE + body.len());
    message.put_u8(frame.kind() as u8);
    message.put_u32(body.len() as u32);
    message.extend_from_slice(&body);
    Ok(message.freeze())
}

/// Decode a frame from bytes
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    if bytes.len() < HEADER_SIZE {
        return Err(StoreError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let kind = FrameKind::from_byte(bytes[0])?;
    let payload_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;

    // Validate payload length
    if payload_len > MAX_PAYLOAD_SIZE as usize {
        return Err(StoreError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let total_len = HEADER_SIZE + payload_len;
    if bytes.len() < total_len {
        return Err(StoreError::Protocol(format!(
            "Incomplete payload: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    decode_body(kind, &bytes[HEADER_SIZE..total_len])
}

fn decode_body(kind: FrameKind, mut body: &[u8]) -> Result<Frame> {
    match kind {
        FrameKind::Command => Ok(Frame::Command(bincode::deserialize(body)?)),
        FrameKind::Response => Ok(Frame::Response(decode_response_body(body)?)),
        FrameKind::BulkData => Ok(Frame::BulkData(decode_response_body(body)?)),
        FrameKind::BulkAck => Ok(Frame::BulkAck(decode_response_body(body)?)),
        FrameKind::BulkPull => {
            if body.len() != 12 {
                return Err(StoreError::Protocol(format!(
                    "BULK_PULL: expected 12 byte body, got {}",
                    body.len()
                )));
            }
            let offset = body.get_u64();
            let len = body.get_u32();
            Ok(Frame::BulkPull { offset, len })
        }
        FrameKind::BulkPush => {
            if body.len() < 8 {
                return Err(StoreError::Protocol("BULK_PUSH: missing offset".to_string()));
            }
            let offset = body.get_u64();
            Ok(Frame::BulkPush { offset, data: body.to_vec() })
        }
    }
}

fn decode_response_body(body: &[u8]) -> Result<Response> {
    let (&status, payload) = body
        .split_first()
        .ok_or_else(|| StoreError::Protocol("Response: missing status".to_string()))?;
    Ok(Response { status: Status::from_byte(status)?, payload: payload.to_vec() })
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete frame from a stream
///
/// Blocks until a complete frame is received or an error occurs
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    // Read header first
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let kind = FrameKind::from_byte(header[0])?;
    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

    // Validate payload length
    if payload_len > MAX_PAYLOAD_SIZE as usize {
        return Err(StoreError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let mut body = vec![0u8; payload_len];
    if payload_len > 0 {
        reader.read_exact(&mut body)?;
    }

    decode_body(kind, &body)
}

/// Write a frame to a stream
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
