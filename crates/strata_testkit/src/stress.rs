//! Stress tests for Strata.
//!
//! These tests verify behavior under heavy load and concurrent access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use strata_core::{CoreError, StorageEnvironment};

const TREE: &str = "stress";

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Size of each value in bytes.
    pub value_size: usize,
    /// Number of distinct keys.
    pub key_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            value_size: 256,
            key_count: 1_000,
        }
    }
}

fn key(index: usize) -> [u8; 8] {
    (index as u64).to_be_bytes()
}

fn populate(env: &StorageEnvironment, config: &StressConfig) {
    let data = vec![0xABu8; config.value_size];
    let _ = env.write(|txn| {
        let mut tree = txn.create_tree(TREE)?;
        for i in 0..config.key_count {
            tree.add(&key(i), &data)?;
        }
        Ok(())
    });
}

/// Run a sequential write stress test, one transaction per write.
pub fn stress_sequential_writes(env: &StorageEnvironment, config: &StressConfig) -> StressTestResult {
    let data = vec![0xABu8; config.value_size];

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        match env.write(|txn| txn.create_tree(TREE)?.add(&key(i % config.key_count), &data)) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a sequential read stress test.
pub fn stress_sequential_reads(env: &StorageEnvironment, config: &StressConfig) -> StressTestResult {
    populate(env, config);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let k = key(i % config.key_count);
        match env.read(|txn| match txn.open_tree(TREE)? {
            Some(tree) => tree.read(&k),
            None => Ok(None),
        }) {
            // Not found is still a successful read
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a mixed read/write stress test.
pub fn stress_mixed_operations(env: &StorageEnvironment, config: &StressConfig) -> StressTestResult {
    let data = vec![0xABu8; config.value_size];

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let k = key(i % config.key_count);
        let result = match i % 4 {
            0 | 1 => env.write(|txn| txn.create_tree(TREE)?.add(&k, &data)),
            2 => env.write(|txn| txn.create_tree(TREE)?.delete(&k).map(|_| ())),
            _ => env
                .read(|txn| match txn.open_tree(TREE)? {
                    Some(tree) => tree.read(&k),
                    None => Ok(None),
                })
                .map(|_| ()),
        };
        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a concurrent read stress test with one writer committing alongside
/// the readers.
///
/// Every reader checks that the values it sees within one transaction all
/// come from the same commit.
pub fn stress_concurrent_reads(env: Arc<StorageEnvironment>, config: &StressConfig) -> StressTestResult {
    populate(&env, config);

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads.max(1);
    let key_count = config.key_count.max(1);

    let start = Instant::now();

    let writer = {
        let env = Arc::clone(&env);
        let rounds = ops_per_thread / 10 + 1;
        thread::spawn(move || {
            for round in 0..rounds {
                let stamp = (round as u64).to_be_bytes();
                let _ = env.write(|txn| {
                    let mut tree = txn.create_tree(TREE)?;
                    tree.add(&key(0), &stamp)?;
                    tree.add(&key(key_count - 1), &stamp)
                });
            }
        })
    };

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let env = Arc::clone(&env);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let idx = (t * ops_per_thread + i) % key_count;
                    let result = env.read(|txn| {
                        let Some(tree) = txn.open_tree(TREE)? else {
                            return Ok(());
                        };
                        tree.read(&key(idx))?;
                        if tree.read(&key(0))? != tree.read(&key(key_count - 1))? {
                            return Err(CoreError::invariant("reader saw two commits"));
                        }
                        Ok(())
                    });
                    match result {
                        Ok(()) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    writer.join().expect("Writer panicked");

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a transaction abort stress test.
pub fn stress_transaction_aborts(env: &StorageEnvironment, config: &StressConfig) -> StressTestResult {
    let data = vec![0xABu8; config.value_size];

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        // Every other transaction fails intentionally
        let should_fail = i % 2 == 0;

        let result = env.write(|txn| {
            txn.create_tree(TREE)?.add(&key(i), &data)?;
            if should_fail {
                Err(CoreError::transaction_aborted("intentional"))
            } else {
                Ok(())
            }
        });

        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a large transaction stress test.
pub fn stress_large_transactions(env: &StorageEnvironment, config: &StressConfig) -> StressTestResult {
    let data = vec![0xABu8; config.value_size];
    // Entries per transaction
    let batch_size = 100;

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for batch in 0..(config.operations / batch_size) {
        let result = env.write(|txn| {
            let mut tree = txn.create_tree(TREE)?;
            for i in 0..batch_size {
                tree.add(&key(batch * batch_size + i), &data)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => successful += batch_size,
            Err(_) => failed += batch_size,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}
