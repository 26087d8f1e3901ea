//! Tests for Router
//!
//! These tests verify:
//! - Deterministic key → shard routing
//! - One directory per shard
//! - Reads and writes land on the owning shard only
//! - Data survives reopening the router

use std::collections::HashSet;
use std::time::Duration;

use shardkv::config::Config;
use shardkv::router::shard_dir;
use shardkv::{KvError, Router, Storage};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(dir: &std::path::Path, shards: usize) -> Config {
    Config::builder()
        .data_dir(dir)
        .shard_count(shards)
        .memtable_size_limit(512)
        .compaction_interval(Duration::from_secs(3600))
        .build()
}

// =============================================================================
// Routing Tests
// =============================================================================

#[test]
fn test_route_is_crc32_modulo() {
    let temp = TempDir::new().unwrap();
    let router = Router::open(config(temp.path(), 4)).unwrap();

    for key in ["a", "b", "user:42", ""] {
        let expected = crc32fast::hash(key.as_bytes()) as usize % 4;
        assert_eq!(router.route(key), expected);
    }
}

#[test]
fn test_route_is_stable_across_reopen() {
    let temp = TempDir::new().unwrap();
    let keys: Vec<String> = (0..50).map(|i| format!("key{}", i)).collect();

    let before: Vec<usize> = {
        let router = Router::open(config(temp.path(), 3)).unwrap();
        keys.iter().map(|k| router.route(k)).collect()
    };
    let router = Router::open(config(temp.path(), 3)).unwrap();
    let after: Vec<usize> = keys.iter().map(|k| router.route(k)).collect();

    assert_eq!(before, after);
}

#[test]
fn test_keys_spread_over_shards() {
    let temp = TempDir::new().unwrap();
    let router = Router::open(config(temp.path(), 4)).unwrap();

    let used: HashSet<usize> = (0..200).map(|i| router.route(&format!("key{}", i))).collect();
    assert_eq!(used.len(), 4);
}

// =============================================================================
// Shard Layout Tests
// =============================================================================

#[test]
fn test_one_directory_per_shard() {
    let temp = TempDir::new().unwrap();
    let router = Router::open(config(temp.path(), 3)).unwrap();

    assert_eq!(router.shard_count(), 3);
    for i in 0..3 {
        assert!(shard_dir(temp.path(), i).is_dir());
        assert_eq!(router.shard(i).unwrap().dir(), shard_dir(temp.path(), i));
    }
    assert!(matches!(router.shard(3), Err(KvError::InvalidArgument(_))));
}

#[test]
fn test_zero_shards_rejected() {
    let temp = TempDir::new().unwrap();
    assert!(matches!(
        Router::open(config(temp.path(), 0)),
        Err(KvError::Config(_))
    ));
}

// =============================================================================
// Operation Tests
// =============================================================================

#[test]
fn test_set_lands_on_owning_shard() {
    let temp = TempDir::new().unwrap();
    let router = Router::open(config(temp.path(), 4)).unwrap();

    router.set("user:42", "alice").unwrap();

    let owner = router.route("user:42");
    for i in 0..4 {
        let result = router.shard(i).unwrap().get("user:42");
        if i == owner {
            assert_eq!(result.unwrap(), "alice");
        } else {
            assert!(result.unwrap_err().is_not_found());
        }
    }
    assert_eq!(router.get("user:42").unwrap(), "alice");
}

#[test]
fn test_many_keys_roundtrip_and_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let router = Router::open(config(temp.path(), 3)).unwrap();
        for i in 0..300 {
            router.set(&format!("key{}", i), &format!("value{}", i)).unwrap();
        }
        assert_eq!(router.compact_all().unwrap(), 3);
        router.close().unwrap();
    }

    let router = Router::open(config(temp.path(), 3)).unwrap();
    for i in 0..300 {
        assert_eq!(router.get(&format!("key{}", i)).unwrap(), format!("value{}", i));
    }
    assert!(matches!(router.get("missing"), Err(KvError::NotFound)));

    let segments: usize = router.stats().iter().map(|s| s.segment_count).sum();
    assert!(segments >= 3);
}

#[test]
fn test_router_as_storage() {
    let temp = TempDir::new().unwrap();
    let router = Router::open(config(temp.path(), 2)).unwrap();
    let storage: &dyn Storage = &router;

    storage.set("k", "v").unwrap();
    assert_eq!(storage.get("k").unwrap(), "v");
}
