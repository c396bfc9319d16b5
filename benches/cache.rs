//! Benchmarks for pool-cache hot paths.
//!
//! These benchmarks exercise the performance-critical paths:
//! - Cache get operations (index lookup + refcount + policy touch)
//! - Cache put operations (allocation + copy + index insert)
//! - Put under eviction pressure (allocation + victim selection)
//!
//! Run with: cargo bench --bench cache

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pool_cache::{PoolCache, PoolCacheBuilder, Replacement};

/// Generate a key from an index.
fn make_key(index: usize) -> Vec<u8> {
    format!("key:{index:016x}").into_bytes()
}

/// Generate a value of specified size.
fn make_value(size: usize) -> Vec<u8> {
    vec![0xAB; size]
}

fn cache_with_capacity(pool_size: usize) -> PoolCache {
    PoolCacheBuilder::new()
        .pool_size(pool_size)
        .fragment_size(64)
        .replacement(Replacement::Lru)
        .build()
        .expect("failed to create cache")
}

/// Benchmark cache get operations.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool/get");

    for (num_items, value_size) in [(10_000, 64), (100_000, 64), (10_000, 1024)] {
        let pool_size = (num_items * (value_size + 64) * 2).max(64 * 1024 * 1024);
        let cache = cache_with_capacity(pool_size);

        // Pre-populate
        let value = make_value(value_size);
        for i in 0..num_items {
            cache.put(&make_key(i), &value).expect("put failed");
        }

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new(format!("{value_size}b"), num_items),
            &num_items,
            |b, &n| {
                let mut i = 0;
                b.iter(|| {
                    let key = make_key(i % n);
                    i += 1;
                    let guard = cache.get(&key).expect("get failed");
                    black_box(guard.value().len())
                });
            },
        );
    }

    group.finish();
}

/// Benchmark cache put operations without eviction pressure.
fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool/put");

    for value_size in [64, 1024, 16384] {
        let cache = cache_with_capacity(256 * 1024 * 1024);
        let value = make_value(value_size);

        group.throughput(Throughput::Bytes(value_size as u64));
        group.bench_function(BenchmarkId::from_parameter(value_size), |b| {
            let mut i = 0;
            b.iter(|| {
                // Cycle a bounded key set so the pool never fills.
                let key = make_key(i % 10_000);
                i += 1;
                cache.put(&key, black_box(&value)).expect("put failed");
            });
        });
    }

    group.finish();
}

/// Benchmark put with constant eviction pressure in a small pool.
fn bench_put_with_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool/put_evict");

    let cache = cache_with_capacity(4 * 1024 * 1024);
    let value = make_value(4096);

    group.throughput(Throughput::Bytes(4096));
    group.bench_function("4096b", |b| {
        let mut i = 0;
        b.iter(|| {
            let key = make_key(i);
            i += 1;
            cache.put(&key, black_box(&value)).expect("put failed");
        });
    });

    group.finish();
}

criterion_group!(benches, bench_get, bench_put, bench_put_with_eviction);
criterion_main!(benches);
