//! Tests for the Merger
//!
//! These tests verify:
//! - Newer values win on duplicate keys
//! - Output is sorted, deduplicated, and split by the size bound
//! - Output ids sort after every input
//! - Output starts provisional and intermediate runs are cleaned up
//! - Inputs are never modified

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use shardkv::memtable::entry_cost;
use shardkv::storage::{Merger, Segment, SegmentId, SegmentSet, SegmentStore};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store() -> (TempDir, SegmentStore) {
    let temp = TempDir::new().unwrap();
    let (store, _) = SegmentStore::open(temp.path(), 256).unwrap();
    (temp, store)
}

fn segment(store: &SegmentStore, seq: u64, pairs: &[(&str, &str)]) -> Arc<Segment> {
    Arc::new(store.build(SegmentId::flushed(seq), pairs.iter().copied()).unwrap())
}

fn contents(run: &[Arc<Segment>]) -> Vec<(String, String)> {
    run.iter()
        .flat_map(|s| s.iter())
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

fn payload_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "gz"))
        .count()
}

// =============================================================================
// Merge Semantics Tests
// =============================================================================

#[test]
fn test_newer_segment_wins() {
    let (_temp, store) = setup_store();
    let older = segment(&store, 1, &[("a", "1"), ("b", "2")]);
    let newer = segment(&store, 2, &[("b", "3"), ("c", "4")]);

    let merged = Merger::new(&store, 1024).compact(&[older, newer]).unwrap();

    assert_eq!(merged.len(), 1);
    assert_eq!(
        contents(&merged),
        vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "3".to_string()),
            ("c".to_string(), "4".to_string()),
        ]
    );
}

#[test]
fn test_many_segments_match_model() {
    let (_temp, store) = setup_store();
    let mut model = BTreeMap::new();
    let mut inputs = Vec::new();

    for seq in 1..=7u64 {
        let pairs: Vec<(String, String)> = (0..30)
            .filter(|i| (i + seq as usize) % 3 != 0)
            .map(|i| (format!("key{:03}", i), format!("v{}-{}", seq, i)))
            .collect();
        for (k, v) in &pairs {
            model.insert(k.clone(), v.clone());
        }
        inputs.push(Arc::new(store.build(SegmentId::flushed(seq), pairs).unwrap()));
    }

    let merged = Merger::new(&store, 1024).compact(&inputs).unwrap();

    let expected: Vec<(String, String)> = model.into_iter().collect();
    assert_eq!(contents(&merged), expected);
}

#[test]
fn test_merge_is_idempotent() {
    let (_temp, store) = setup_store();
    let older = segment(&store, 1, &[("a", "1"), ("b", "2")]);
    let newer = segment(&store, 2, &[("b", "3"), ("c", "4")]);
    let merger = Merger::new(&store, 1024);

    let once = merger.compact(&[older, newer]).unwrap();
    let expected = contents(&once);

    let again = merger.compact(&once).unwrap();
    assert_eq!(contents(&again), expected);
}

#[test]
fn test_single_segment_is_unchanged() {
    let (_temp, store) = setup_store();
    let only = segment(&store, 1, &[("a", "1")]);

    let merged = Merger::new(&store, 1024).compact(&[Arc::clone(&only)]).unwrap();

    assert_eq!(merged.len(), 1);
    assert!(Arc::ptr_eq(&merged[0], &only));
}

// =============================================================================
// Output Shape Tests
// =============================================================================

#[test]
fn test_output_split_by_size_limit() {
    let (_temp, store) = setup_store();
    let left: Vec<(String, String)> = (0..20).map(|i| (format!("k{:02}", i * 2), "x".into())).collect();
    let right: Vec<(String, String)> =
        (0..20).map(|i| (format!("k{:02}", i * 2 + 1), "y".into())).collect();
    let inputs = vec![
        Arc::new(store.build(SegmentId::flushed(1), left).unwrap()),
        Arc::new(store.build(SegmentId::flushed(2), right).unwrap()),
    ];

    // Each pair costs 3 + 1 + 8 = 12; five pairs per output segment
    let limit = 5 * entry_cost("k00", "x");
    let merged = Merger::new(&store, limit).compact(&inputs).unwrap();

    assert_eq!(merged.len(), 8);
    let run = contents(&merged);
    assert_eq!(run.len(), 40);
    assert!(run.windows(2).all(|w| w[0].0 < w[1].0));

    // Output segments hold disjoint ascending key ranges
    for pair in merged.windows(2) {
        let last_of_prev = contents(&pair[..1]).pop().unwrap().0;
        let first_of_next = pair[1].index().first_key().unwrap().to_string();
        assert!(last_of_prev < first_of_next);
    }
}

#[test]
fn test_output_ids_sort_after_inputs() {
    let (_temp, store) = setup_store();
    let inputs = vec![
        segment(&store, 3, &[("a", "1")]),
        segment(&store, 5, &[("b", "1")]),
        segment(&store, 9, &[("c", "1")]),
    ];

    let merged = Merger::new(&store, 1024).compact(&inputs).unwrap();

    let newest_input = inputs.iter().map(|s| s.id()).max().unwrap();
    for output in &merged {
        assert!(output.id() > newest_input);
        assert!(output.id() < SegmentId::flushed(10));
    }
}

// =============================================================================
// Output Lifecycle Tests
// =============================================================================

#[test]
fn test_unretained_output_is_discarded() {
    let (temp, store) = setup_store();
    let inputs = vec![
        segment(&store, 1, &[("a", "1")]),
        segment(&store, 2, &[("b", "2")]),
    ];

    let merged = Merger::new(&store, 1024).compact(&inputs).unwrap();
    assert!(merged.iter().all(|s| s.is_obsolete()));
    assert_eq!(payload_count(temp.path()), 3);

    drop(merged);
    assert_eq!(payload_count(temp.path()), 2);
}

#[test]
fn test_intermediate_runs_are_removed() {
    let (temp, store) = setup_store();
    let inputs: Vec<_> = (1..=4u64)
        .map(|seq| segment(&store, seq, &[("k", "v")]))
        .collect();

    let merged = Merger::new(&store, 1024).compact(&inputs).unwrap();
    for output in &merged {
        output.retain();
    }

    // Four inputs plus the single final output
    assert_eq!(payload_count(temp.path()), 5);
    assert_eq!(contents(&merged), vec![("k".to_string(), "v".to_string())]);
}

#[test]
fn test_inputs_untouched() {
    let (_temp, store) = setup_store();
    let older = segment(&store, 1, &[("a", "1"), ("b", "2")]);
    let newer = segment(&store, 2, &[("b", "3")]);
    let before = SegmentSet::new(vec![Arc::clone(&older), Arc::clone(&newer)]);

    let _merged = Merger::new(&store, 1024).compact(before.segments()).unwrap();

    assert!(!older.is_obsolete());
    assert_eq!(contents(&[Arc::clone(&older)]).len(), 2);
    assert_eq!(older.find("b").unwrap().as_deref(), Some("2"));
}
