//! Bulk handle backed by the client connection
//!
//! Each pull or push is split into pieces that fit a frame and exchanged
//! with the client while the command is in flight. The stream lock is
//! held for one request/answer pair at a time.

use parking_lot::Mutex;

use super::connection::FramedStream;
use crate::error::{Result, StoreError};
use crate::protocol::{Frame, MAX_PAYLOAD_SIZE};
use crate::transfer::BulkHandle;

/// Largest piece moved by one bulk frame
pub const MAX_BULK_PIECE: usize = (MAX_PAYLOAD_SIZE as usize) / 2;

pub struct RemoteBulk<'a> {
    io: &'a Mutex<FramedStream>,
    len: u64,
}

impl<'a> RemoteBulk<'a> {
    pub fn new(io: &'a Mutex<FramedStream>, len: u64) -> Self {
        Self { io, len }
    }

    fn check(&self, offset: u64, len: usize) -> Result<()> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(StoreError::Transfer(format!(
                "bulk access [{}, +{}) exceeds exposed buffer of {} bytes",
                offset, len, self.len
            ))),
        }
    }
}

fn leg_failed(what: &str, err: StoreError) -> StoreError {
    match err {
        StoreError::Transfer(_) => err,
        other => StoreError::Transfer(format!("{} failed: {}", what, other)),
    }
}

impl BulkHandle for RemoteBulk<'_> {
    fn len(&self) -> u64 {
        self.len
    }

    fn pull(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check(offset, buf.len())?;
        let mut at = offset;
        for piece in buf.chunks_mut(MAX_BULK_PIECE) {
            let request = Frame::BulkPull { offset: at, len: piece.len() as u32 };
            let answer = self.io.lock().exchange(&request).map_err(|e| leg_failed("bulk pull", e))?;
            let data = match answer {
                Frame::BulkData(response) => response.into_body().map_err(|e| leg_failed("bulk pull", e))?,
                other => {
                    return Err(StoreError::Protocol(format!(
                        "expected BULK_DATA, got {:?}",
                        other.kind()
                    )))
                }
            };
            if data.len() != piece.len() {
                return Err(StoreError::Transfer(format!(
                    "bulk pull returned {} bytes, expected {}",
                    data.len(),
                    piece.len()
                )));
            }
            piece.copy_from_slice(&data);
            at += piece.len() as u64;
        }
        Ok(())
    }

    fn push(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check(offset, data.len())?;
        let mut at = offset;
        for piece in data.chunks(MAX_BULK_PIECE) {
            let request = Frame::BulkPush { offset: at, data: piece.to_vec() };
            let answer = self.io.lock().exchange(&request).map_err(|e| leg_failed("bulk push", e))?;
            match answer {
                Frame::BulkAck(response) => {
                    response.into_body().map_err(|e| leg_failed("bulk push", e))?;
                }
                other => {
                    return Err(StoreError::Protocol(format!(
                        "expected BULK_ACK, got {:?}",
                        other.kind()
                    )))
                }
            }
            at += piece.len() as u64;
        }
        Ok(())
    }
}
