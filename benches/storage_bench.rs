//! Benchmarks for shardkv storage operations

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use shardkv::config::{Config, WalSyncStrategy};
use shardkv::storage::{Merger, Segment, SegmentId, SegmentStore};
use shardkv::Shard;
use tempfile::TempDir;

fn bench_config() -> Config {
    Config::builder()
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 1000 })
        .memtable_size_limit(256 * 1024)
        .compaction_interval(Duration::from_secs(3600))
        .build()
}

fn pairs(count: usize, tag: &str) -> Vec<(String, String)> {
    (0..count)
        .map(|i| (format!("key{:06}", i), format!("{}-value-{:06}", tag, i)))
        .collect()
}

fn shard_benchmarks(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let shard = Shard::open(temp.path(), &bench_config()).unwrap();
    for (k, v) in pairs(10_000, "seed") {
        shard.set(&k, &v).unwrap();
    }

    let mut i = 0usize;
    c.bench_function("shard_set", |b| {
        b.iter(|| {
            i += 1;
            shard.set(&format!("bench{:08}", i), "value").unwrap();
        })
    });

    c.bench_function("shard_get_hit", |b| {
        let mut n = 0usize;
        b.iter(|| {
            n = (n + 7919) % 10_000;
            black_box(shard.get(&format!("key{:06}", n)).unwrap());
        })
    });

    c.bench_function("shard_get_miss", |b| {
        b.iter(|| black_box(shard.get("absent").is_err()))
    });
}

fn segment_benchmarks(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let segment = Segment::build_from_sorted(
        temp.path(),
        SegmentId::flushed(1),
        pairs(10_000, "seg"),
        4096,
    )
    .unwrap();

    c.bench_function("segment_find", |b| {
        let mut n = 0usize;
        b.iter(|| {
            n = (n + 7919) % 10_000;
            black_box(segment.find(&format!("key{:06}", n)).unwrap());
        })
    });

    c.bench_function("segment_build_1k", |b| {
        let input = pairs(1_000, "build");
        let mut seq = 100u64;
        b.iter_batched(
            || {
                seq += 1;
                SegmentId::flushed(seq)
            },
            |id| {
                let entries = input.iter().map(|(k, v)| (k, v));
                let built = Segment::build_from_sorted(temp.path(), id, entries, 4096).unwrap();
                built.mark_obsolete();
            },
            BatchSize::SmallInput,
        )
    });
}

fn compaction_benchmarks(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let (store, _) = SegmentStore::open(temp.path(), 4096).unwrap();
    let inputs: Vec<Arc<Segment>> = (1..=8u64)
        .map(|seq| {
            let tag = format!("gen{}", seq);
            Arc::new(store.build(SegmentId::flushed(seq), pairs(1_000, &tag)).unwrap())
        })
        .collect();

    c.bench_function("compact_8x1k", |b| {
        let merger = Merger::new(&store, 256 * 1024);
        b.iter(|| black_box(merger.compact(&inputs).unwrap().len()))
    });
}

criterion_group!(benches, shard_benchmarks, segment_benchmarks, compaction_benchmarks);
criterion_main!(benches);
