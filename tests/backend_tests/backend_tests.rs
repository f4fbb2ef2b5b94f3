//! Tests for Backends
//!
//! These tests verify:
//! - The common create/write/read/persist/erase contract on every backend
//! - Bounds and existence checks
//! - Recovery of live regions when a persistent store is reopened
//! - pmdk capacity limits and slot reuse
//! - Concurrent writes to disjoint ranges of one region
//! - pmdk writes to separate regions while other regions persist
//! - Corrupt headers with huge sizes stop recovery instead of overflowing

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use regionstore::backend::{open_backend, AbtIoBackend, Backend, PmemBackend};
use regionstore::config::TargetConfig;
use regionstore::StoreError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// Overwrite a little-endian u64 inside a store file
fn corrupt_u64(path: &Path, at: u64, value: u64) {
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.write_all_at(&value.to_le_bytes(), at).unwrap();
    file.sync_all().unwrap();
}

/// One backend of each kind; the TempDir keeps file-backed stores alive
fn all_backends() -> Vec<(TempDir, Box<dyn Backend>)> {
    let memory_dir = TempDir::new().unwrap();
    let abtio_dir = TempDir::new().unwrap();
    let pmem_dir = TempDir::new().unwrap();

    let abtio = open_backend(&TargetConfig::abtio(abtio_dir.path().join("store.abtio"))).unwrap();
    let pmem =
        open_backend(&TargetConfig::pmdk(pmem_dir.path().join("store.pmem"), 8 * 1024 * 1024)).unwrap();
    let memory = open_backend(&TargetConfig::memory()).unwrap();

    vec![(memory_dir, memory), (abtio_dir, abtio), (pmem_dir, pmem)]
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

// =============================================================================
// Contract Tests
// =============================================================================

#[test]
fn test_write_then_read() {
    for (_dir, backend) in all_backends() {
        let id = backend.create(4096).unwrap();
        let data = pattern(1000, 3);
        backend.write(&id, 100, &data).unwrap();

        let mut out = vec![0u8; 1000];
        backend.read(&id, 100, &mut out).unwrap();
        assert_eq!(out, data, "backend {:?}", backend.kind());
    }
}

#[test]
fn test_fresh_region_reads_zeroes() {
    for (_dir, backend) in all_backends() {
        let id = backend.create(256).unwrap();
        let mut out = vec![0xFFu8; 256];
        backend.read(&id, 0, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0), "backend {:?}", backend.kind());
    }
}

#[test]
fn test_out_of_range_access() {
    for (_dir, backend) in all_backends() {
        let id = backend.create(64).unwrap();
        backend.write(&id, 0, &[1u8; 64]).unwrap();
        assert!(matches!(backend.write(&id, 1, &[1u8; 64]), Err(StoreError::OutOfRange(_))));
        assert!(matches!(backend.read(&id, 60, &mut [0u8; 8]), Err(StoreError::OutOfRange(_))));
        assert!(matches!(backend.persist(&id, 0, 65), Err(StoreError::OutOfRange(_))));
    }
}

#[test]
fn test_persist_succeeds() {
    for (_dir, backend) in all_backends() {
        let id = backend.create(128).unwrap();
        backend.write(&id, 0, &[9u8; 128]).unwrap();
        backend.persist(&id, 0, 128).unwrap();
        backend.persist(&id, 16, 0).unwrap();
    }
}

#[test]
fn test_erase_makes_region_unknown() {
    for (_dir, backend) in all_backends() {
        let id = backend.create(32).unwrap();
        backend.erase(&id).unwrap();
        assert!(matches!(backend.write(&id, 0, &[1]), Err(StoreError::UnknownRegion(_))));
        assert!(matches!(backend.read(&id, 0, &mut [0u8; 1]), Err(StoreError::UnknownRegion(_))));
        assert!(matches!(backend.persist(&id, 0, 1), Err(StoreError::UnknownRegion(_))));
        assert!(matches!(backend.erase(&id), Err(StoreError::UnknownRegion(_))));
    }
}

#[test]
fn test_destroy_makes_backend_unavailable() {
    for (_dir, backend) in all_backends() {
        let id = backend.create(32).unwrap();
        backend.destroy().unwrap();
        assert!(backend.create(8).is_err());
        assert!(backend.read(&id, 0, &mut [0u8; 1]).is_err());
    }
}

#[test]
fn test_concurrent_disjoint_writes() {
    for (_dir, backend) in all_backends() {
        let backend: Arc<dyn Backend> = Arc::from(backend);
        let id = backend.create(16 * 1024).unwrap();

        let handles: Vec<_> = (0..16u8)
            .map(|i| {
                let backend = Arc::clone(&backend);
                thread::spawn(move || {
                    backend.write(&id, i as u64 * 1024, &vec![i; 1024]).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut out = vec![0u8; 16 * 1024];
        backend.read(&id, 0, &mut out).unwrap();
        for (i, chunk) in out.chunks(1024).enumerate() {
            assert!(chunk.iter().all(|&b| b == i as u8));
        }
    }
}

// =============================================================================
// abtio Tests
// =============================================================================

#[test]
fn test_abtio_recovers_live_regions() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.abtio");
    let data = pattern(5000, 11);

    let (kept, erased) = {
        let backend = AbtIoBackend::open(&TargetConfig::abtio(&path)).unwrap();
        let kept = backend.create(5000).unwrap();
        let erased = backend.create(100).unwrap();
        backend.write(&kept, 0, &data).unwrap();
        backend.persist(&kept, 0, 5000).unwrap();
        backend.erase(&erased).unwrap();
        (kept, erased)
    };

    let mut reopen = TargetConfig::abtio(&path);
    reopen.override_if_exists = false;
    let backend = AbtIoBackend::open(&reopen).unwrap();

    let recovered = backend.recover().unwrap();
    assert_eq!(recovered, vec![(kept, 5000)]);

    let mut out = vec![0u8; 5000];
    backend.read(&kept, 0, &mut out).unwrap();
    assert_eq!(out, data);
    assert!(matches!(backend.read(&erased, 0, &mut [0u8; 1]), Err(StoreError::UnknownRegion(_))));

    // New regions land after the recovered ones
    let fresh = backend.create(10).unwrap();
    backend.write(&fresh, 0, &[7u8; 10]).unwrap();
    backend.read(&kept, 0, &mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn test_abtio_override_discards_existing() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.abtio");
    {
        let backend = AbtIoBackend::open(&TargetConfig::abtio(&path)).unwrap();
        backend.create(10).unwrap();
    }
    let backend = AbtIoBackend::open(&TargetConfig::abtio(&path)).unwrap();
    assert!(backend.recover().unwrap().is_empty());
}

#[test]
fn test_abtio_rejects_foreign_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.abtio");
    std::fs::write(&path, vec![0xABu8; 128]).unwrap();

    let mut target = TargetConfig::abtio(&path);
    target.override_if_exists = false;
    assert!(matches!(AbtIoBackend::open(&target), Err(StoreError::BackendUnavailable(_))));
}

#[test]
fn test_abtio_large_write_with_several_io_threads() {
    let temp = TempDir::new().unwrap();
    let mut target = TargetConfig::abtio(temp.path().join("store.abtio"));
    target.io_threads = 4;
    target.alignment = 4096;
    let backend = AbtIoBackend::open(&target).unwrap();

    let data = pattern(3 * 1024 * 1024 + 17, 5);
    let id = backend.create(data.len() as u64).unwrap();
    backend.write(&id, 0, &data).unwrap();
    let mut out = vec![0u8; data.len()];
    backend.read(&id, 0, &mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn test_abtio_huge_region_size_stops_recovery() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.abtio");

    let (kept, corrupted) = {
        let backend = AbtIoBackend::open(&TargetConfig::abtio(&path)).unwrap();
        let kept = backend.create(100).unwrap();
        let corrupted = backend.create(100).unwrap();
        (kept, corrupted)
    };
    // Header: magic, state, size at bytes 8..16
    corrupt_u64(&path, corrupted.parts().0 + 8, u64::MAX - 8);

    let mut reopen = TargetConfig::abtio(&path);
    reopen.override_if_exists = false;
    let backend = AbtIoBackend::open(&reopen).unwrap();
    assert_eq!(backend.recover().unwrap(), vec![(kept, 100)]);

    // The corrupt tail is reused
    let fresh = backend.create(10).unwrap();
    backend.write(&fresh, 0, &[3u8; 10]).unwrap();
}

// =============================================================================
// pmdk Tests
// =============================================================================

#[test]
fn test_pmem_huge_slot_capacity_stops_recovery() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.pmem");

    let (kept, corrupted) = {
        let backend = PmemBackend::open(&TargetConfig::pmdk(&path, 1 << 20)).unwrap();
        let kept = backend.create(100).unwrap();
        let corrupted = backend.create(100).unwrap();
        (kept, corrupted)
    };
    // Slot header: magic, state, size, capacity at bytes 16..24
    corrupt_u64(&path, corrupted.parts().0 + 16, u64::MAX - 8);

    let mut reopen = TargetConfig::pmdk(&path, 1 << 20);
    reopen.override_if_exists = false;
    let backend = PmemBackend::open(&reopen).unwrap();
    assert_eq!(backend.recover().unwrap(), vec![(kept, 100)]);

    let fresh = backend.create(10).unwrap();
    backend.write(&fresh, 0, &[3u8; 10]).unwrap();
}

#[test]
fn test_pmem_regions_write_while_others_persist() {
    let temp = TempDir::new().unwrap();
    let backend = Arc::new(PmemBackend::open(&TargetConfig::pmdk(temp.path().join("store.pmem"), 8 << 20)).unwrap());
    let regions: Vec<_> = (0..8).map(|_| backend.create(256 * 1024).unwrap()).collect();

    let handles: Vec<_> = regions
        .iter()
        .enumerate()
        .map(|(i, &id)| {
            let backend = Arc::clone(&backend);
            thread::spawn(move || {
                for round in 0..20u8 {
                    let fill = (i as u8).wrapping_mul(31).wrapping_add(round);
                    backend.write(&id, 0, &vec![fill; 256 * 1024]).unwrap();
                    backend.persist(&id, 0, 256 * 1024).unwrap();
                    let mut out = vec![0u8; 256 * 1024];
                    backend.read(&id, 0, &mut out).unwrap();
                    assert!(out.iter().all(|&b| b == fill));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_pmem_out_of_space() {
    let temp = TempDir::new().unwrap();
    let backend = PmemBackend::open(&TargetConfig::pmdk(temp.path().join("store.pmem"), 64 * 1024)).unwrap();
    assert!(matches!(backend.create(128 * 1024), Err(StoreError::OutOfSpace(_))));

    let mut regions = Vec::new();
    loop {
        match backend.create(4096) {
            Ok(id) => regions.push(id),
            Err(StoreError::OutOfSpace(_)) => break,
            Err(e) => panic!("unexpected error {}", e),
        }
    }
    assert!(!regions.is_empty());

    // Erasing one frees a slot for a region of the same size
    backend.erase(&regions[0]).unwrap();
    backend.create(4096).unwrap();
}

#[test]
fn test_pmem_reused_slot_gets_new_id() {
    let temp = TempDir::new().unwrap();
    let backend = PmemBackend::open(&TargetConfig::pmdk(temp.path().join("store.pmem"), 1 << 20)).unwrap();

    let old = backend.create(100).unwrap();
    backend.write(&old, 0, &[1u8; 100]).unwrap();
    backend.erase(&old).unwrap();

    let new = backend.create(50).unwrap();
    assert_ne!(old, new);
    assert!(matches!(backend.read(&old, 0, &mut [0u8; 1]), Err(StoreError::UnknownRegion(_))));

    // The new tenant does not see the old bytes
    let mut out = [0xFFu8; 50];
    backend.read(&new, 0, &mut out).unwrap();
    assert!(out.iter().all(|&b| b == 0));
}

#[test]
fn test_pmem_recovers_live_regions() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("store.pmem");
    let data = pattern(3000, 77);

    let (kept, erased) = {
        let backend = PmemBackend::open(&TargetConfig::pmdk(&path, 1 << 20)).unwrap();
        let erased = backend.create(200).unwrap();
        let kept = backend.create(3000).unwrap();
        backend.write(&kept, 0, &data).unwrap();
        backend.persist(&kept, 0, 3000).unwrap();
        backend.erase(&erased).unwrap();
        (kept, erased)
    };

    let mut reopen = TargetConfig::pmdk(&path, 1 << 20);
    reopen.override_if_exists = false;
    let backend = PmemBackend::open(&reopen).unwrap();
    assert_eq!(backend.recover().unwrap(), vec![(kept, 3000)]);

    let mut out = vec![0u8; 3000];
    backend.read(&kept, 0, &mut out).unwrap();
    assert_eq!(out, data);
    assert!(backend.read(&erased, 0, &mut [0u8; 1]).is_err());

    // Generations keep increasing across reopen
    let fresh = backend.create(100).unwrap();
    assert_ne!(fresh, erased);
    assert_ne!(fresh, kept);
}
