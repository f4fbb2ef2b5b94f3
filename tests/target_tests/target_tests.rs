//! Target Handle Tests
//!
//! These tests verify:
//! - Eager and bulk paths give identical results on either side of the
//!   thresholds
//! - Threshold setters are shared by every clone of a handle
//! - Asynchronous requests: idempotent wait, ids usable right away,
//!   errors carried through
//! - Pipeline-configured providers serve the same results

use std::sync::Arc;

use regionstore::config::{PipelineConfig, ProviderConfig, TargetConfig};
use regionstore::policy::DEFAULT_EAGER_THRESHOLD;
use regionstore::{Client, Provider, StoreError, TargetHandle};

// =============================================================================
// Helper Functions
// =============================================================================

fn local_client(config: ProviderConfig) -> Client {
    Client::local(Arc::new(Provider::open(config).unwrap()))
}

fn memory_target() -> TargetHandle {
    let target = local_client(ProviderConfig::default()).target();
    target.set_eager_write_threshold(128);
    target.set_eager_read_threshold(128);
    target
}

fn pipeline_target() -> TargetHandle {
    let config = ProviderConfig::builder()
        .target(TargetConfig::memory())
        .pipeline(PipelineConfig::new(2, 8, 1024, 2))
        .build()
        .unwrap();
    let target = local_client(config).target();
    target.set_eager_write_threshold(128);
    target.set_eager_read_threshold(128);
    target
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}

// =============================================================================
// Threshold Tests
// =============================================================================

#[test]
fn test_default_thresholds() {
    let target = local_client(ProviderConfig::default()).target();
    assert_eq!(target.eager_write_threshold(), DEFAULT_EAGER_THRESHOLD);
    assert_eq!(target.eager_read_threshold(), DEFAULT_EAGER_THRESHOLD);
}

#[test]
fn test_sizes_around_threshold() {
    for target in [memory_target(), pipeline_target()] {
        for len in [64usize, 127, 128, 129, 196, 5000] {
            let data = pattern(len, len as u8);
            let id = target.create(len as u64).unwrap();
            target.write(&id, 0, &data, false).unwrap();
            assert_eq!(target.read(&id, 0, len as u64).unwrap(), data, "len {}", len);
        }
    }
}

#[test]
fn test_eager_write_bulk_read_and_back() {
    let target = memory_target();
    let data = pattern(196, 3);
    let id = target.create(196).unwrap();

    // Write eagerly, read through bulk
    target.set_eager_write_threshold(1024);
    target.write(&id, 0, &data, false).unwrap();
    target.set_eager_read_threshold(0);
    assert_eq!(target.read(&id, 0, 196).unwrap(), data);

    // Write through bulk, read eagerly
    let data = pattern(196, 99);
    target.set_eager_write_threshold(0);
    target.write(&id, 0, &data, false).unwrap();
    target.set_eager_read_threshold(1024);
    assert_eq!(target.read(&id, 0, 196).unwrap(), data);
}

#[test]
fn test_setters_are_shared_between_clones() {
    let target = memory_target();
    let clone = target.clone();
    clone.set_eager_write_threshold(4096);
    clone.set_eager_read_threshold(8);
    assert_eq!(target.eager_write_threshold(), 4096);
    assert_eq!(target.eager_read_threshold(), 8);
}

#[test]
fn test_fresh_handles_do_not_share_thresholds() {
    let client = local_client(ProviderConfig::default());
    let first = client.target();
    first.set_eager_write_threshold(1);
    assert_eq!(client.target().eager_write_threshold(), DEFAULT_EAGER_THRESHOLD);
}

// =============================================================================
// Operation Tests
// =============================================================================

#[test]
fn test_read_into_buffer() {
    let target = pipeline_target();
    let data = pattern(10_000, 17);
    let id = target.create_and_write(&data, true).unwrap();

    let mut small = [0u8; 64];
    target.read_into(&id, 100, &mut small).unwrap();
    assert_eq!(&small[..], &data[100..164]);

    let mut large = vec![0u8; 9_000];
    target.read_into(&id, 1_000, &mut large).unwrap();
    assert_eq!(large, data[1_000..]);
}

#[test]
fn test_create_and_write_both_paths() {
    let target = memory_target();
    for len in [100usize, 1000] {
        let data = pattern(len, 1);
        let id = target.create_and_write(&data, false).unwrap();
        assert_eq!(target.read(&id, 0, len as u64).unwrap(), data);
    }
}

#[test]
fn test_errors_reach_the_caller() {
    let target = memory_target();
    let id = target.create(10).unwrap();
    assert!(matches!(target.write(&id, 5, &[0u8; 6], false), Err(StoreError::OutOfRange(_))));
    assert!(matches!(target.write(&id, 5, &[0u8; 600], false), Err(StoreError::OutOfRange(_))));

    target.erase(&id).unwrap();
    assert!(matches!(target.read(&id, 0, 1), Err(StoreError::UnknownRegion(_))));
    assert!(matches!(target.persist(&id, 0, 1), Err(StoreError::UnknownRegion(_))));
}

#[test]
fn test_get_config_through_handle() {
    let target = pipeline_target();
    let doc: serde_json::Value = serde_json::from_str(&target.get_config().unwrap()).unwrap();
    assert_eq!(doc["transfer_manager"]["type"], "pipeline");
}

// =============================================================================
// Asynchronous Tests
// =============================================================================

#[test]
fn test_async_wait_is_idempotent() {
    let target = memory_target();
    let request = target.create_async(256);
    let first = request.wait().unwrap();
    let second = request.wait().unwrap();
    assert_eq!(first, second);
    assert!(request.completed());
    assert!(request.test());
}

#[test]
fn test_async_create_id_is_usable_immediately() {
    let target = memory_target();
    let id = target.create_async(512).wait().unwrap();
    target.write(&id, 0, &[5u8; 512], true).unwrap();
    assert_eq!(target.read(&id, 0, 512).unwrap(), vec![5u8; 512]);
}

#[test]
fn test_async_operations_in_flight_together() {
    let target = pipeline_target();
    let id = target.create(8 * 4096).unwrap();

    let writes: Vec<_> = (0..8u8)
        .map(|i| target.write_async(&id, i as u64 * 4096, vec![i; 4096], false))
        .collect();
    for w in &writes {
        w.wait().unwrap();
    }
    target.persist_async(&id, 0, 8 * 4096).wait().unwrap();

    let reads: Vec<_> = (0..8u64).map(|i| target.read_async(&id, i * 4096, 4096)).collect();
    for (i, r) in reads.iter().enumerate() {
        assert_eq!(r.wait().unwrap(), vec![i as u8; 4096]);
    }
}

#[test]
fn test_async_create_and_write_and_erase() {
    let target = memory_target();
    let data = pattern(3000, 2);
    let id = target.create_and_write_async(data.clone(), true).wait().unwrap();
    assert_eq!(target.read(&id, 0, 3000).unwrap(), data);

    target.erase_async(&id).wait().unwrap();
    let again = target.erase_async(&id);
    assert!(matches!(again.wait(), Err(StoreError::UnknownRegion(_))));
    assert!(matches!(again.wait(), Err(StoreError::UnknownRegion(_))));
}
