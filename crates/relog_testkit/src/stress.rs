//! Stress tests for relog.
//!
//! These drive many producers at once and report throughput.

use crate::fixtures::TestLog;
use crate::model::Key;
use relog_core::Lsn;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Highest LSN a producer saw become durable.
    pub highest_durable: Lsn,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, highest_durable: Lsn, duration: Duration) -> Self {
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
            highest_durable,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Highest durable: {}", self.highest_durable);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per thread.
    pub operations: usize,
    /// Number of producer threads.
    pub threads: usize,
    /// Size of each value in bytes.
    pub value_size: usize,
    /// Distinct keys per thread.
    pub keys_per_thread: usize,
    /// Every n-th operation requests a sync and waits for it (0 = never).
    pub sync_every: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 2_000,
            threads: 4,
            value_size: 64,
            keys_per_thread: 50,
            sync_every: 100,
        }
    }
}

/// Runs concurrent puts, one scope per thread so writes to a key stay
/// serialized.
pub fn stress_concurrent_puts(log: &TestLog, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let outcomes: Vec<(usize, usize, Lsn)> = thread::scope(|s| {
        let handles: Vec<_> = (0..config.threads)
            .map(|thread| {
                s.spawn(move || {
                    let scope = thread as u64;
                    let mut ok = 0;
                    let mut failed = 0;
                    let mut highest = Lsn::NONE;
                    for i in 0..config.operations {
                        let key = Key::new(scope, format!("k{}", i % config.keys_per_thread.max(1)));
                        let value = vec![(i % 251) as u8; config.value_size];
                        let sync = config.sync_every > 0 && i % config.sync_every == 0;
                        let action = log.store.put(key, value);
                        let result = log.engine.append(action, sync).and_then(|receipt| {
                            if sync {
                                receipt.wait()
                            } else {
                                Ok(receipt.lsn())
                            }
                        });
                        match result {
                            Ok(lsn) => {
                                ok += 1;
                                if sync {
                                    highest = highest.max(lsn);
                                }
                            }
                            Err(_) => failed += 1,
                        }
                    }
                    (ok, failed, highest)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("producer thread panicked"))
            .collect()
    });

    let successful = outcomes.iter().map(|(ok, _, _)| ok).sum();
    let failed = outcomes.iter().map(|(_, failed, _)| failed).sum();
    let highest = outcomes
        .iter()
        .map(|(_, _, highest)| *highest)
        .max()
        .unwrap_or(Lsn::NONE);
    StressTestResult::new(successful, failed, highest, start.elapsed())
}
