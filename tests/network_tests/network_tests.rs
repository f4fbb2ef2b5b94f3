//! Network Tests
//!
//! End-to-end tests through a real TCP server:
//! - Eager and bulk operations from a remote client
//! - Bulk transfers larger than one wire frame piece
//! - Error variants preserved across the wire
//! - Connection limit and malformed frames
//! - Pooled connections closed by the server while idle are replaced

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use regionstore::config::{PipelineConfig, ProviderConfig, ServerConfig, TargetConfig};
use regionstore::network::{FramedStream, Server, MAX_BULK_PIECE};
use regionstore::protocol::{Command, Frame, Payload, Status};
use regionstore::{Client, Provider, Result, StoreError};

// =============================================================================
// Helper Functions
// =============================================================================

struct TestServer {
    addr: String,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl TestServer {
    fn start(provider: ProviderConfig, max_connections: usize) -> Self {
        Self::start_with_read_timeout(provider, max_connections, 0)
    }

    fn start_with_read_timeout(provider: ProviderConfig, max_connections: usize, read_timeout_ms: u64) -> Self {
        let config = ServerConfig::builder()
            .provider(provider.clone())
            .listen_addr("127.0.0.1:0")
            .max_connections(max_connections)
            .read_timeout_ms(read_timeout_ms)
            .build();
        let provider = Arc::new(Provider::open(provider).unwrap());
        let mut server = Server::new(config, provider);
        let addr = server.bind().unwrap().to_string();
        let shutdown = server.shutdown_handle();
        let handle = thread::spawn(move || server.run());
        Self { addr, shutdown, handle: Some(handle) }
    }

    fn client(&self) -> Client {
        Client::connect(&self.addr).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap().unwrap();
        }
    }
}

fn pipeline_config() -> ProviderConfig {
    ProviderConfig::builder()
        .target(TargetConfig::memory())
        .pipeline(PipelineConfig::new(2, 8, 4096, 2))
        .build()
        .unwrap()
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(29).wrapping_add(seed)).collect()
}

// =============================================================================
// Remote Operation Tests
// =============================================================================

#[test]
fn test_remote_eager_operations() {
    let server = TestServer::start(ProviderConfig::default(), 16);
    let target = server.client().target();

    let id = target.create(64).unwrap();
    target.write(&id, 0, b"over the wire", true).unwrap();
    assert_eq!(target.read(&id, 0, 13).unwrap(), b"over the wire");
    target.persist(&id, 0, 64).unwrap();
    target.erase(&id).unwrap();
}

#[test]
fn test_remote_bulk_operations() {
    let server = TestServer::start(pipeline_config(), 16);
    let target = server.client().target();

    let data = pattern(3 * 1024 * 1024, 4);
    let id = target.create_and_write(&data, true).unwrap();
    assert_eq!(target.read(&id, 0, data.len() as u64).unwrap(), data);

    // Partial ranges on both paths
    assert_eq!(target.read(&id, 1000, 100).unwrap(), data[1000..1100]);
    assert_eq!(target.read(&id, 5000, 100_000).unwrap(), data[5000..105_000]);
}

#[test]
fn test_bulk_larger_than_one_piece() {
    let server = TestServer::start(ProviderConfig::default(), 16);
    let target = server.client().target();

    let data = pattern(MAX_BULK_PIECE + 12_345, 8);
    let id = target.create(data.len() as u64).unwrap();
    target.write(&id, 0, &data, false).unwrap();
    assert_eq!(target.read(&id, 0, data.len() as u64).unwrap(), data);
}

#[test]
fn test_remote_async_operations() {
    let server = TestServer::start(pipeline_config(), 16);
    let target = server.client().target();

    let ids: Vec<_> = (0..8).map(|_| target.create_async(10_000)).collect();
    let writes: Vec<_> = ids
        .iter()
        .enumerate()
        .map(|(i, req)| {
            let id = req.wait().unwrap();
            (id, target.write_async(&id, 0, vec![i as u8; 10_000], false))
        })
        .collect();
    for (i, (id, write)) in writes.iter().enumerate() {
        write.wait().unwrap();
        assert_eq!(target.read(id, 0, 10_000).unwrap(), vec![i as u8; 10_000]);
    }
}

#[test]
fn test_remote_get_config() {
    let server = TestServer::start(pipeline_config(), 16);
    let config = server.client().target().get_config().unwrap();
    let doc: serde_json::Value = serde_json::from_str(&config).unwrap();
    assert_eq!(doc["transfer_manager"]["config"]["first_buffer_size"], 4096);
}

#[test]
fn test_idle_connection_closed_by_server_is_replaced() {
    let server = TestServer::start_with_read_timeout(ProviderConfig::default(), 16, 50);
    let client = server.client();
    let target = client.target();

    let id = target.create(16).unwrap();
    // The server drops the pooled connection after 50 ms of silence
    thread::sleep(Duration::from_millis(250));
    target.write(&id, 0, b"still reachable", false).unwrap();
    assert_eq!(target.read(&id, 0, 15).unwrap(), b"still reachable");
}

#[test]
fn test_closed_stream_is_stale() {
    let server = TestServer::start_with_read_timeout(ProviderConfig::default(), 16, 50);
    let stream = FramedStream::connect(server.addr.as_str()).unwrap();
    assert!(!stream.is_stale());

    thread::sleep(Duration::from_millis(250));
    assert!(stream.is_stale());
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_error_variants_survive_the_wire() {
    let server = TestServer::start(ProviderConfig::default(), 16);
    let target = server.client().target();

    let id = target.create(100).unwrap();
    assert!(matches!(target.read(&id, 50, 51), Err(StoreError::OutOfRange(_))));
    assert!(matches!(target.write(&id, 0, &vec![0u8; 5000], false), Err(StoreError::OutOfRange(_))));

    target.erase(&id).unwrap();
    assert!(matches!(target.read(&id, 0, 1), Err(StoreError::UnknownRegion(_))));
    assert!(matches!(target.erase(&id), Err(StoreError::UnknownRegion(_))));

    // The connection stays usable after errors
    let again = target.create(1).unwrap();
    target.write(&again, 0, &[1], false).unwrap();
}

#[test]
fn test_connection_limit() {
    let server = TestServer::start(ProviderConfig::default(), 1);
    let first = server.client();
    first.target().create(1).unwrap();

    let mut second = FramedStream::connect(server.addr.as_str()).unwrap();
    match second.read_frame().unwrap() {
        Frame::Response(response) => {
            assert_eq!(response.status, Status::Network);
            assert!(matches!(response.into_body(), Err(StoreError::Network(_))));
        }
        other => panic!("expected a response, got {:?}", other),
    }

    // The admitted client keeps working
    first.target().create(1).unwrap();
}

#[test]
fn test_non_command_frame_is_rejected() {
    let server = TestServer::start(ProviderConfig::default(), 16);
    let mut stream = FramedStream::connect(server.addr.as_str()).unwrap();

    let reply = stream.exchange(&Frame::BulkPull { offset: 0, len: 1 }).unwrap();
    match reply {
        Frame::Response(response) => assert_eq!(response.status, Status::Protocol),
        other => panic!("expected a response, got {:?}", other),
    }

    // A bulk command whose exposed buffer is too short fails cleanly
    let command = Command::CreateAndWrite { payload: Payload::Bulk { size: 16 }, persist: false };
    stream.write_frame(&Frame::Command(command)).unwrap();
    match stream.read_frame().unwrap() {
        Frame::BulkPull { offset, len } => {
            assert_eq!((offset, len), (0, 16));
            let short = regionstore::protocol::Response::ok(vec![1u8; 4]);
            stream.write_frame(&Frame::BulkData(short)).unwrap();
        }
        other => panic!("expected a bulk pull, got {:?}", other),
    }
    match stream.read_frame().unwrap() {
        Frame::Response(response) => assert_eq!(response.status, Status::Transfer),
        other => panic!("expected a response, got {:?}", other),
    }
}
