//! Connection Handler
//!
//! Handles individual client connections.

use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::bulk::RemoteBulk;
use crate::error::{Result, StoreError};
use crate::protocol::{read_frame, write_frame, Command, Frame, Response};
use crate::provider::Provider;
use crate::transfer::BulkHandle;

/// Buffered frame I/O over one TCP stream
pub struct FramedStream {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,
}

impl FramedStream {
    pub fn new(stream: TcpStream) -> Result<Self> {
        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        // Clone stream for separate read/write handles
        let read_stream = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
        })
    }

    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| StoreError::Network(format!("connect failed: {}", e)))?;
        Self::new(stream)
    }

    /// Configure read/write timeouts (0 = none)
    pub fn set_timeouts(&self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.reader.get_ref().set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            self.writer.get_ref().set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    pub fn read_frame(&mut self) -> Result<Frame> {
        read_frame(&mut self.reader)
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        write_frame(&mut self.writer, frame)
    }

    /// Write `request`, then read the frame that answers it
    pub fn exchange(&mut self, request: &Frame) -> Result<Frame> {
        self.write_frame(request)?;
        self.read_frame()
    }

    /// Whether an idle stream can no longer carry a request: the peer
    /// closed or reset it, or sent bytes nobody asked for
    pub fn is_stale(&self) -> bool {
        if !self.reader.buffer().is_empty() {
            return true;
        }
        let stream = self.reader.get_ref();
        if stream.set_nonblocking(true).is_err() {
            return true;
        }
        let mut byte = [0u8; 1];
        let stale = match stream.peek(&mut byte) {
            Ok(_) => true,
            Err(e) => e.kind() != std::io::ErrorKind::WouldBlock,
        };
        stale || stream.set_nonblocking(false).is_err()
    }

    pub fn peer_addr(&self) -> String {
        self.reader
            .get_ref()
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

/// Whether an I/O error just means the peer went away
pub(crate) fn is_disconnect(err: &StoreError) -> bool {
    match err {
        StoreError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::TimedOut
        ),
        _ => false,
    }
}

/// Handles a single client connection
pub struct Connection {
    /// Frame I/O, shared with the bulk handle of the command in flight
    io: Mutex<FramedStream>,

    /// Provider serving this connection
    provider: Arc<Provider>,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(stream: TcpStream, provider: Arc<Provider>) -> Result<Self> {
        let framed = FramedStream::new(stream)?;
        let peer_addr = framed.peer_addr();
        Ok(Self { io: Mutex::new(framed), provider, peer_addr })
    }

    /// Configure connection timeouts
    pub fn set_timeouts(&self, read_ms: u64, write_ms: u64) -> Result<()> {
        self.io.lock().set_timeouts(read_ms, write_ms)
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Reads commands in a loop and sends responses.
    /// Returns when the client disconnects or an error occurs.
    pub fn handle(&self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        loop {
            let next = self.io.lock().read_frame();
            let frame = match next {
                Ok(frame) => frame,
                Err(e) if is_disconnect(&e) => {
                    tracing::debug!("Client {} disconnected", self.peer_addr);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    // Send error response if possible
                    let _ = self.send_response(Response::error(&e));
                    return Err(e);
                }
            };

            let response = match frame {
                Frame::Command(command) => {
                    tracing::trace!("Received command from {}: {:?}", self.peer_addr, command.command_type());
                    self.execute_command(command)
                }
                other => Response::error(&StoreError::Protocol(format!(
                    "expected a command frame, got {:?}",
                    other.kind()
                ))),
            };

            if let Err(e) = self.send_response(response) {
                if is_disconnect(&e) {
                    tracing::debug!(
                        "Client {} disconnected before response could be sent: {}",
                        self.peer_addr,
                        e
                    );
                    return Ok(());
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                return Err(e);
            }
        }
    }

    /// Execute a command and return a response
    fn execute_command(&self, command: Command) -> Response {
        let bulk_len = command.bulk_pull_size().or_else(|| command.bulk_push_size());
        let remote = bulk_len.map(|len| RemoteBulk::new(&self.io, len));
        let bulk = remote.as_ref().map(|r| r as &dyn BulkHandle);
        let result = self.provider.execute(command, bulk);
        if let Err(e) = &result {
            tracing::debug!("Command from {} failed: {}", self.peer_addr, e);
        }
        Response::from_result(result)
    }

    /// Send a response to the client
    fn send_response(&self, response: Response) -> Result<()> {
        self.io.lock().write_frame(&Frame::Response(response))
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}
