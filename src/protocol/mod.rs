//! Protocol Module
//!
//! Defines the wire protocol for client-server communication.
//!
//! ## Protocol Format
//!
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Kind (1) │ Len (4)  │         Body                │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Exchange
//! A client sends one COMMAND and reads frames until the RESPONSE arrives.
//! In between, the server may issue any number of bulk frames against the
//! buffer the client exposed for that command:
//! ```text
//! client                          server
//!   │ ── COMMAND ─────────────────► │
//!   │ ◄──────────────── BULK_PULL ─ │   (bulk write)
//!   │ ── BULK_DATA ───────────────► │
//!   │ ◄──────────────── BULK_PUSH ─ │   (bulk read)
//!   │ ── BULK_ACK ────────────────► │
//!   │ ◄───────────────── RESPONSE ─ │
//! ```
//!
//! ### Status Codes
//! - 0x00: OK
//! - 0x01..0x0A: one per error kind, see [`Status`]

mod codec;
mod command;
mod response;

pub use codec::{
    decode_frame, encode_frame, read_frame, write_frame, Frame, FrameKind, HEADER_SIZE,
    MAX_PAYLOAD_SIZE,
};
pub use command::{Command, CommandType, Payload, ReadMode};
pub use response::{Reply, Response, Status};
