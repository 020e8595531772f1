//! Tree operation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use strata_bench::utils::{
    bench_environment, populated_environment, random_data, sequential_keys, shuffled_keys,
    BENCH_TREE,
};
use strata_core::{Config, Slice, StorageEnvironment};
use tempfile::TempDir;

/// Benchmark single-entry write transactions.
fn bench_single_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_insert");

    for size in [64, 256, 1024, 8192].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let env = bench_environment();
            let data = random_data(size);
            let mut next = 0u64;

            b.iter(|| {
                next += 1;
                env.write(|txn| txn.create_tree(BENCH_TREE)?.add(&next.to_be_bytes(), black_box(&data)))
                    .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark many inserts in one transaction, in key order and shuffled.
fn bench_batch_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_insert");

    for batch_size in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        for (order, keys) in [
            ("sequential", sequential_keys(*batch_size)),
            ("shuffled", shuffled_keys(*batch_size)),
        ] {
            group.bench_with_input(BenchmarkId::new(order, batch_size), &keys, |b, keys| {
                let data = random_data(64);
                b.iter(|| {
                    let env = bench_environment();
                    env.write(|txn| {
                        let mut tree = txn.create_tree(BENCH_TREE)?;
                        for key in keys {
                            tree.add(key, black_box(&data))?;
                        }
                        Ok(())
                    })
                    .unwrap();
                });
            });
        }
    }
    group.finish();
}

/// Benchmark point reads in trees of increasing size.
fn bench_point_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_read");

    for count in [1_000, 100_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let env = populated_environment(count, 100);
            let txn = env.begin_read().unwrap();
            let tree = txn.open_tree(BENCH_TREE).unwrap().unwrap();
            let keys = shuffled_keys(count);
            let mut i = 0;

            b.iter(|| {
                let value = tree.read(black_box(&keys[i % keys.len()])).unwrap();
                i += 1;
                black_box(value);
            });
        });
    }
    group.finish();
}

/// Benchmark a full scan.
fn bench_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");

    for count in [1_000, 100_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let env = populated_environment(count, 32);

            b.iter(|| {
                let txn = env.begin_read().unwrap();
                let tree = txn.open_tree(BENCH_TREE).unwrap().unwrap();
                let seen = tree
                    .iterate(Slice::BeforeAllKeys, Slice::AfterAllKeys)
                    .unwrap()
                    .count();
                black_box(seen);
            });
        });
    }
    group.finish();
}

/// Benchmark transaction overhead.
fn bench_transaction_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("transaction_overhead");
    let env = populated_environment(1_000, 32);

    group.bench_function("begin_read", |b| {
        b.iter(|| {
            let txn = env.begin_read().unwrap();
            black_box(txn.generation());
        });
    });

    group.bench_function("empty_write", |b| {
        b.iter(|| {
            let mut txn = env.begin_write().unwrap();
            txn.rollback().unwrap();
        });
    });

    group.finish();
}

/// Benchmark commits against a durable environment.
fn bench_durable_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("durable_commit");
    // Every commit syncs the journal
    group.sample_size(20);

    for sync in [true, false] {
        group.bench_with_input(BenchmarkId::new("sync_on_commit", sync), &sync, |b, &sync| {
            let dir = TempDir::new().unwrap();
            let config = Config::default().sync_on_commit(sync);
            let env = StorageEnvironment::open_with_config(dir.path(), config).unwrap();
            let data = random_data(256);
            let mut next = 0u64;

            b.iter(|| {
                next += 1;
                env.write(|txn| txn.create_tree(BENCH_TREE)?.add(&next.to_be_bytes(), &data))
                    .unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_single_insert,
    bench_batch_insert,
    bench_point_read,
    bench_iterate,
    bench_transaction_overhead,
    bench_durable_commit,
);

criterion_main!(benches);
