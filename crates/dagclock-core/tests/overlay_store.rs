//! Integration tests for the bounded overlay store over both persistent
//! backends: round-trips across flush/evict cycles, the resident memory
//! bound, and closed-store behavior.

use std::collections::BTreeMap;

use dagclock_core::store::{KvStore, MemoryStore, OverlayStore, SqliteStore, StoreError, entry_mem_est};
use proptest::prelude::*;

#[path = "generators.rs"]
mod generators;
use generators::*;

fn key(i: usize) -> Vec<u8> {
    format!("hb{i:08}").into_bytes()
}

fn value(i: usize) -> Vec<u8> {
    vec![u8::try_from(i % 251).expect("fits"); 32]
}

#[test]
fn values_survive_many_flush_cycles() {
    let budget = entry_mem_est(10, 32) * 8;
    let mut store = OverlayStore::new(MemoryStore::new(), budget, 256);

    for round in 0..20 {
        for i in 0..25 {
            let n = round * 25 + i;
            store.put(&key(n), &value(n)).expect("put");
        }
        store.flush().expect("flush");
        assert!(store.backing().resident_size() <= budget);
    }

    for n in 0..500 {
        assert_eq!(store.get(&key(n)).expect("get"), Some(value(n)), "key {n}");
    }
    let parent = store.backing().parent().expect("open");
    assert!(parent.len() >= 500 - 8);
}

#[test]
fn overwrite_after_spill_wins() {
    let mut store = OverlayStore::new(MemoryStore::new(), 0, 1024);
    store.put(b"k", b"old").expect("put");
    store.flush().expect("flush");
    store.put(b"k", b"new").expect("put");
    assert_eq!(store.get(b"k").expect("get"), Some(b"new".to_vec()));
    store.flush().expect("flush");
    assert_eq!(store.get(b"k").expect("get"), Some(b"new".to_vec()));
}

#[test]
fn sqlite_backed_overlay_spills_to_disk() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("vectors.sqlite3");
    let budget = entry_mem_est(10, 32) * 4;

    let mut store = OverlayStore::new(SqliteStore::open(&path).expect("open"), budget, 128);
    for n in 0..64 {
        store.put(&key(n), &value(n)).expect("put");
    }
    store.flush().expect("flush");
    assert!(store.backing().resident_len() <= 4);

    let disk = SqliteStore::open(&path).expect("second connection");
    assert_eq!(disk.get(&key(0)).expect("get"), Some(value(0)));
    assert!(disk.get(&key(63)).expect("get").is_none(), "hottest entry stays resident");

    for n in 0..64 {
        assert_eq!(store.get(&key(n)).expect("get"), Some(value(n)));
    }
    store.close().expect("close");
    assert!(matches!(store.get(&key(0)), Err(StoreError::Closed)));
}

#[test]
fn has_sees_every_tier() {
    let mut store = OverlayStore::new(MemoryStore::new(), entry_mem_est(10, 32), 1024);
    store.put(&key(0), &value(0)).expect("put");
    store.put(&key(1), &value(1)).expect("put");
    store.flush().expect("flush");
    store.put(&key(2), &value(2)).expect("put");

    // key 0 spilled, key 1 resident, key 2 pending
    assert!(store.has(&key(0)).expect("has"));
    assert!(store.has(&key(1)).expect("has"));
    assert!(store.has(&key(2)).expect("has"));
    assert!(!store.has(&key(3)).expect("has"));
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(200))]

    #[test]
    fn overlay_matches_a_plain_map(
        batches in prop::collection::vec(prop::collection::vec(arb_pair(), 0..20), 1..8),
        budget in 0usize..4096,
    ) {
        let mut store = OverlayStore::new(MemoryStore::new(), budget, 512);
        let mut model = BTreeMap::new();
        for batch in &batches {
            for (k, v) in batch {
                store.put(k, v).expect("put");
                model.insert(k.clone(), v.clone());
            }
            store.flush().expect("flush");
            prop_assert!(store.backing().resident_size() <= budget);
            prop_assert_eq!(store.not_flushed_pairs(), 0);
        }
        for (k, v) in &model {
            prop_assert_eq!(store.get(k).expect("get"), Some(v.clone()));
        }
    }
}

/// Memory backend whose batch writes fail while `offline` is set.
#[derive(Debug, Default)]
struct FlakyStore {
    inner: MemoryStore,
    offline: bool,
}

impl KvStore for FlakyStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::backend(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "volume offline",
            )));
        }
        self.inner.put(key, value)
    }
}

#[test]
fn failed_spill_surfaces_backend_error_and_keeps_entries() {
    let backend = FlakyStore {
        offline: true,
        ..FlakyStore::default()
    };
    let mut store = OverlayStore::new(backend, 0, 1024);
    store.put(b"hb-a", b"1").expect("put");
    store.put(b"hb-b", b"2").expect("put");

    let err = store.flush().expect_err("backend offline");
    let StoreError::Backend(source) = &err else {
        panic!("unexpected error {err}");
    };
    let io = source
        .downcast_ref::<std::io::Error>()
        .expect("io error passed through");
    assert_eq!(io.kind(), std::io::ErrorKind::NotConnected);

    // nothing reached the backend, nothing was lost
    assert_eq!(store.backing().resident_len(), 2);
    assert_eq!(store.get(b"hb-a").expect("get"), Some(b"1".to_vec()));
    assert_eq!(store.backing().parent().expect("open").inner.writes(), 0);
}
