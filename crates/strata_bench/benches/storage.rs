//! Pager and log storage benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use strata_bench::utils::random_data;
use strata_storage::{
    FileLog, LogStorage, MemoryLog, MemoryPager, MmapPager, PageNumber, Pager, PagerOptions,
};
use tempfile::TempDir;

const PAGES: u64 = 1024;

fn options(page_size: usize) -> PagerOptions {
    PagerOptions {
        initial_pages: PAGES,
        ..PagerOptions::new(page_size)
    }
}

/// Benchmark page writes into each pager.
fn bench_page_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_write");

    for page_size in [4096usize, 16384].iter() {
        group.throughput(Throughput::Bytes(*page_size as u64));

        group.bench_with_input(BenchmarkId::new("memory", page_size), page_size, |b, &size| {
            let pager = MemoryPager::with_options(options(size));
            pager.ensure(PAGES).unwrap();
            let data = random_data(size);
            let mut page = 0u64;

            b.iter(|| {
                page = (page + 1) % PAGES;
                pager.write(PageNumber(page), black_box(&data)).unwrap();
            });
        });

        group.bench_with_input(BenchmarkId::new("mmap", page_size), page_size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let pager = MmapPager::open(&temp_dir.path().join("bench.db"), options(size)).unwrap();
            pager.ensure(PAGES).unwrap();
            let data = random_data(size);
            let mut page = 0u64;

            b.iter(|| {
                page = (page + 1) % PAGES;
                pager.write(PageNumber(page), black_box(&data)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark page reads from each pager.
fn bench_page_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_read");
    let size = 4096usize;
    group.throughput(Throughput::Bytes(size as u64));

    let memory = MemoryPager::with_options(options(size));
    memory.ensure(PAGES).unwrap();
    let temp_dir = TempDir::new().unwrap();
    let mmap = MmapPager::open(&temp_dir.path().join("bench.db"), options(size)).unwrap();
    mmap.ensure(PAGES).unwrap();
    let data = random_data(size);
    for page in 0..PAGES {
        memory.write(PageNumber(page), &data).unwrap();
        mmap.write(PageNumber(page), &data).unwrap();
    }

    let pagers: [(&str, &dyn Pager); 2] = [("memory", &memory), ("mmap", &mmap)];
    for (name, pager) in pagers {
        group.bench_function(name, |b| {
            let mut page = 0u64;
            b.iter(|| {
                page = (page + 7) % PAGES;
                black_box(pager.read(PageNumber(page)).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark syncing a mapped file after a burst of writes.
fn bench_mmap_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("mmap_sync");
    // Sync is slow
    group.sample_size(20);

    for dirty in [1u64, 64].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(dirty), dirty, |b, &dirty| {
            let temp_dir = TempDir::new().unwrap();
            let pager = MmapPager::open(&temp_dir.path().join("bench.db"), options(4096)).unwrap();
            pager.ensure(PAGES).unwrap();
            let data = random_data(4096);

            b.iter(|| {
                for page in 0..dirty {
                    pager.write(PageNumber(page), &data).unwrap();
                }
                pager.sync().unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark journal log appends.
fn bench_log_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_append");

    for size in [4096usize, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));

        group.bench_with_input(BenchmarkId::new("memory", size), size, |b, &size| {
            let mut log = MemoryLog::new();
            let data = random_data(size);
            b.iter(|| {
                if log.size().unwrap() > 64 << 20 {
                    log.truncate(0).unwrap();
                }
                black_box(log.append(black_box(&data)).unwrap());
            });
        });

        group.bench_with_input(BenchmarkId::new("file", size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let mut log = FileLog::open(&temp_dir.path().join("bench.journal")).unwrap();
            let data = random_data(size);
            b.iter(|| {
                if log.size().unwrap() > 64 << 20 {
                    log.truncate(0).unwrap();
                }
                black_box(log.append(black_box(&data)).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_page_write,
    bench_page_read,
    bench_mmap_sync,
    bench_log_append,
);

criterion_main!(benches);
