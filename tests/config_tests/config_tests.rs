//! Configuration Tests
//!
//! These tests verify:
//! - JSON parsing of target and transfer manager sections
//! - Validation rules for each backend
//! - Pipeline parameter validation
//! - Round trip through to_json

use regionstore::config::{
    BackendKind, PipelineConfig, PoolAssignment, ProviderConfig, ServerConfig, TargetConfig,
    TransferManagerConfig,
};
use regionstore::StoreError;
use serde_json::json;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn parse(value: serde_json::Value) -> regionstore::Result<ProviderConfig> {
    ProviderConfig::from_json(&value.to_string())
}

fn assert_config_error(result: regionstore::Result<ProviderConfig>) {
    match result {
        Err(StoreError::Config(_)) => {}
        other => panic!("expected a configuration error, got {:?}", other),
    }
}

// =============================================================================
// Target Tests
// =============================================================================

#[test]
fn test_memory_target_defaults_to_default_manager() {
    let config = parse(json!({ "target": { "type": "memory", "config": {} } })).unwrap();
    assert_eq!(config.target.kind, BackendKind::Memory);
    assert_eq!(config.transfer_manager, TransferManagerConfig::Default);
}

#[test]
fn test_missing_target_is_an_error() {
    assert_config_error(parse(json!({ "transfer_manager": { "type": "__default__" } })));
}

#[test]
fn test_unknown_target_type() {
    assert_config_error(parse(json!({ "target": { "type": "tape" } })));
}

#[test]
fn test_abtio_requires_path() {
    assert_config_error(parse(json!({
        "target": { "type": "abtio", "config": { "create_if_missing": true } }
    })));
}

#[test]
fn test_abtio_missing_file_requires_create_if_missing() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.abtio");
    assert_config_error(parse(json!({
        "target": { "type": "abtio", "config": { "path": path.to_string_lossy() } }
    })));

    let config = parse(json!({
        "target": {
            "type": "abtio",
            "config": { "path": path.to_string_lossy(), "create_if_missing": true, "alignment": 4096 }
        }
    }))
    .unwrap();
    assert_eq!(config.target.alignment, 4096);
}

#[test]
fn test_abtio_alignment_must_be_multiple_of_eight() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.abtio");
    assert_config_error(parse(json!({
        "target": {
            "type": "abtio",
            "config": { "path": path.to_string_lossy(), "create_if_missing": true, "alignment": 12 }
        }
    })));
}

#[test]
fn test_pmdk_requires_path() {
    assert_config_error(parse(json!({
        "target": { "type": "pmdk", "config": { "create_if_missing_with_size": 1048576 } }
    })));
}

#[test]
fn test_pmdk_missing_file_requires_size() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.pmem");
    assert_config_error(parse(json!({
        "target": { "type": "pmdk", "config": { "path": path.to_string_lossy() } }
    })));
}

#[test]
fn test_pmdk_override_requires_size() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.pmem");
    std::fs::write(&path, b"existing").unwrap();
    assert_config_error(parse(json!({
        "target": {
            "type": "pmdk",
            "config": { "path": path.to_string_lossy(), "override_if_exists": true }
        }
    })));
}

// =============================================================================
// Transfer Manager Tests
// =============================================================================

#[test]
fn test_pipeline_parses_all_parameters() {
    let config = parse(json!({
        "target": { "type": "memory" },
        "transfer_manager": {
            "type": "pipeline",
            "config": {
                "num_pools": 2,
                "num_buffers_per_pool": 8,
                "first_buffer_size": 1024,
                "buffer_size_multiplier": 2
            }
        }
    }))
    .unwrap();
    assert_eq!(
        config.transfer_manager,
        TransferManagerConfig::Pipeline(PipelineConfig::new(2, 8, 1024, 2))
    );
}

#[test]
fn test_pipeline_accepts_multiple_alias() {
    let config = parse(json!({
        "target": { "type": "memory" },
        "transfer_manager": {
            "type": "pipeline",
            "config": {
                "num_pools": 1,
                "num_buffers_per_pool": 4,
                "first_buffer_size": 512,
                "buffer_size_multiple": 4
            }
        }
    }))
    .unwrap();
    match config.transfer_manager {
        TransferManagerConfig::Pipeline(p) => assert_eq!(p.buffer_size_multiplier, 4),
        other => panic!("expected pipeline, got {:?}", other),
    }
}

#[test]
fn test_pipeline_missing_parameter() {
    for missing in ["num_pools", "num_buffers_per_pool", "first_buffer_size", "buffer_size_multiplier"] {
        let mut cfg = json!({
            "num_pools": 2,
            "num_buffers_per_pool": 8,
            "first_buffer_size": 1024,
            "buffer_size_multiplier": 2
        });
        cfg.as_object_mut().unwrap().remove(missing);
        assert_config_error(parse(json!({
            "target": { "type": "memory" },
            "transfer_manager": { "type": "pipeline", "config": cfg }
        })));
    }
}

#[test]
fn test_pipeline_zero_parameter() {
    assert_config_error(parse(json!({
        "target": { "type": "memory" },
        "transfer_manager": {
            "type": "pipeline",
            "config": { "num_pools": 0, "num_buffers_per_pool": 8, "first_buffer_size": 1024, "buffer_size_multiplier": 2 }
        }
    })));
}

#[test]
fn test_pipeline_buffer_overflow() {
    assert_config_error(parse(json!({
        "target": { "type": "memory" },
        "transfer_manager": {
            "type": "pipeline",
            "config": { "num_pools": 1, "num_buffers_per_pool": 80, "first_buffer_size": 1024, "buffer_size_multiplier": 2 }
        }
    })));
}

#[test]
fn test_pipeline_pool_assignment() {
    let base = |assignment: serde_json::Value| {
        parse(json!({
            "target": { "type": "memory" },
            "transfer_manager": {
                "type": "pipeline",
                "config": {
                    "num_pools": 2, "num_buffers_per_pool": 2, "first_buffer_size": 64,
                    "buffer_size_multiplier": 2, "pool_assignment": assignment
                }
            }
        }))
    };
    match base(json!(1)).unwrap().transfer_manager {
        TransferManagerConfig::Pipeline(p) => assert_eq!(p.pool_assignment, PoolAssignment::Fixed(1)),
        other => panic!("expected pipeline, got {:?}", other),
    }
    match base(json!("region")).unwrap().transfer_manager {
        TransferManagerConfig::Pipeline(p) => assert_eq!(p.pool_assignment, PoolAssignment::ByRegion),
        other => panic!("expected pipeline, got {:?}", other),
    }
    assert_config_error(base(json!(2)));
    assert_config_error(base(json!("random")));
}

#[test]
fn test_unknown_transfer_manager() {
    assert_config_error(parse(json!({
        "target": { "type": "memory" },
        "transfer_manager": { "type": "zero-copy" }
    })));
}

#[test]
fn test_invalid_json() {
    assert_config_error(ProviderConfig::from_json("{ not json"));
}

// =============================================================================
// Round Trip / Builder Tests
// =============================================================================

#[test]
fn test_to_json_round_trip() {
    let temp = TempDir::new().unwrap();
    let config = ProviderConfig::builder()
        .target(TargetConfig::pmdk(temp.path().join("store.pmem"), 1 << 20))
        .pipeline(PipelineConfig::new(2, 4, 256, 3))
        .build()
        .unwrap();
    let reparsed = ProviderConfig::from_value(&config.to_json()).unwrap();
    assert_eq!(reparsed, config);
}

#[test]
fn test_server_config_builder() {
    let config = ServerConfig::builder()
        .listen_addr("127.0.0.1:0")
        .max_connections(3)
        .read_timeout_ms(100)
        .build();
    assert_eq!(config.listen_addr, "127.0.0.1:0");
    assert_eq!(config.max_connections, 3);
    assert_eq!(config.read_timeout_ms, 100);
    assert_eq!(config.provider, ProviderConfig::default());
}
