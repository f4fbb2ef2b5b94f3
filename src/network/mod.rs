//! Network Module
//!
//! TCP server and connection handling.
//!
//! ## Architecture
//! - Single acceptor thread (non-blocking accept, polled shutdown flag)
//! - One thread per connection, bounded by `max_connections`
//! - Commands routed through the Provider; bulk legs travel as extra
//!   frames on the same connection

mod bulk;
mod connection;
mod server;

pub use bulk::{RemoteBulk, MAX_BULK_PIECE};
pub use connection::{Connection, FramedStream};
pub(crate) use connection::is_disconnect;
pub use server::Server;
