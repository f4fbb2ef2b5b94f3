//! Transports: how a client reaches a provider

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::network::{is_disconnect, FramedStream};
use crate::protocol::{Command, Frame, Reply, Response};
use crate::provider::Provider;
use crate::transfer::BulkHandle;

/// RPC dispatch plus access to the caller's exposed buffer
pub trait Transport: Send + Sync {
    /// Run `command` on the provider; `bulk` is what the provider may
    /// pull from or push into while it runs
    fn call(&self, command: Command, bulk: Option<&dyn BulkHandle>) -> Result<Reply>;
}

// =============================================================================
// In-process
// =============================================================================

/// Dispatches straight into a provider in the same process
pub struct LocalTransport {
    provider: Arc<Provider>,
}

impl LocalTransport {
    pub fn new(provider: Arc<Provider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }
}

impl Transport for LocalTransport {
    fn call(&self, command: Command, bulk: Option<&dyn BulkHandle>) -> Result<Reply> {
        self.provider.execute(command, bulk)
    }
}

// =============================================================================
// TCP
// =============================================================================

/// Talks to a remote server; idle connections are kept for reuse
pub struct TcpTransport {
    addr: String,
    idle: Mutex<Vec<FramedStream>>,
}

impl TcpTransport {
    /// Connect once up front so an unreachable server fails early
    pub fn connect(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        let first = FramedStream::connect(&addr)?;
        Ok(Self { addr, idle: Mutex::new(vec![first]) })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// An idle stream that still looks healthy, or a new connection
    fn checkout(&self) -> Result<FramedStream> {
        loop {
            let reused = self.idle.lock().pop();
            match reused {
                Some(stream) if stream.is_stale() => {
                    tracing::debug!(addr = %self.addr, "Dropping stale pooled connection");
                }
                Some(stream) => return Ok(stream),
                None => return FramedStream::connect(&self.addr),
            }
        }
    }

    /// Answer bulk frames until the command's response arrives
    fn converse(
        stream: &mut FramedStream,
        command: Command,
        bulk: Option<&dyn BulkHandle>,
    ) -> Result<Response> {
        stream.write_frame(&Frame::Command(command))?;
        loop {
            match stream.read_frame()? {
                Frame::Response(response) => return Ok(response),
                Frame::BulkPull { offset, len } => {
                    let answer = match bulk {
                        Some(bulk) => {
                            let mut buf = vec![0u8; len as usize];
                            match bulk.pull(offset, &mut buf) {
                                Ok(()) => Response::ok(buf),
                                Err(e) => Response::error(&e),
                            }
                        }
                        None => Response::error(&no_bulk()),
                    };
                    stream.write_frame(&Frame::BulkData(answer))?;
                }
                Frame::BulkPush { offset, data } => {
                    let answer = match bulk.map(|b| b.push(offset, &data)) {
                        Some(Ok(())) => Response::ok(Vec::new()),
                        Some(Err(e)) => Response::error(&e),
                        None => Response::error(&no_bulk()),
                    };
                    stream.write_frame(&Frame::BulkAck(answer))?;
                }
                other => {
                    return Err(StoreError::Protocol(format!(
                        "unexpected {:?} frame from server",
                        other.kind()
                    )))
                }
            }
        }
    }
}

fn no_bulk() -> StoreError {
    StoreError::Transfer("no exposed buffer for this command".to_string())
}

impl Transport for TcpTransport {
    /// A pooled stream the server closed while idle is replaced before the
    /// command is sent. If the server closes it after that check, the call
    /// fails with `Network` and is not retried, since the command may
    /// already have run.
    fn call(&self, command: Command, bulk: Option<&dyn BulkHandle>) -> Result<Reply> {
        let mut stream = self.checkout()?;
        match Self::converse(&mut stream, command, bulk) {
            Ok(response) => {
                self.idle.lock().push(stream);
                response.into_reply()
            }
            Err(e) => {
                // The stream may be mid-exchange; never reuse it
                if is_disconnect(&e) {
                    Err(StoreError::Network(format!("connection to {} lost: {}", self.addr, e)))
                } else {
                    Err(e)
                }
            }
        }
    }
}
