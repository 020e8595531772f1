//! Benchmark utilities.

use rand::seq::SliceRandom;
use rand::Rng;
use strata_core::{Config, StorageEnvironment};

/// Tree the benchmarks write to.
pub const BENCH_TREE: &str = "bench";

/// Generate random value bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Big-endian keys `0..count`, which sort in insertion order.
pub fn sequential_keys(count: usize) -> Vec<[u8; 8]> {
    (0..count as u64).map(u64::to_be_bytes).collect()
}

/// The same keys as [`sequential_keys`], shuffled.
pub fn shuffled_keys(count: usize) -> Vec<[u8; 8]> {
    let mut keys = sequential_keys(count);
    keys.shuffle(&mut rand::thread_rng());
    keys
}

/// In-memory environment with the default page size.
pub fn bench_environment() -> StorageEnvironment {
    StorageEnvironment::open_in_memory_with_config(Config::default())
        .expect("Failed to open in-memory environment")
}

/// Environment with `count` sequential keys of `value_size`-byte values,
/// written in one transaction.
pub fn populated_environment(count: usize, value_size: usize) -> StorageEnvironment {
    let env = bench_environment();
    let value = random_data(value_size);
    env.write(|txn| {
        let mut tree = txn.create_tree(BENCH_TREE)?;
        for key in sequential_keys(count) {
            tree.add(&key, &value)?;
        }
        Ok(())
    })
    .expect("Failed to populate environment");
    env
}
