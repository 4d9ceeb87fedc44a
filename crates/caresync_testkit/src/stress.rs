//! Stress runs for the record store.
//!
//! These exercise the per-record lock table under concurrent writers.

use crate::fixtures::{patient, renamed};
use caresync_core::RecordStore;
use std::sync::Arc;
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
        println!("\n=== {} ===", name);
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
    /// Edits per thread.
    pub edits_per_thread: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Records each thread edits.
    pub records_per_thread: usize,
    /// When true, every thread edits the same records.
    pub shared_records: bool,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            edits_per_thread: 500,
            threads: 4,
            records_per_thread: 10,
            shared_records: false,
        }
    }
}

fn record_id(thread: usize, index: usize, config: &StressConfig) -> String {
    if config.shared_records {
        format!("shared-{index}")
    } else {
        format!("t{thread}-{index}")
    }
}

/// Creates the records a run will edit. Existing records are kept.
pub fn seed_records(store: &RecordStore, config: &StressConfig) {
    let owners = if config.shared_records { 1 } else { config.threads };
    for thread in 0..owners {
        for index in 0..config.records_per_thread {
            let id = record_id(thread, index, config);
            if store.get("Patient", &id).is_none() {
                // A concurrent seeder may have won; either way the record exists.
                let _ = store.create("Patient", patient(&id, "Ann"));
            }
        }
    }
}

/// Runs concurrent renames from several threads.
///
/// Each edit renames a patient to `"<thread>-<edit>"`; every edit appends
/// one change, so the change log grows by exactly the successful count.
pub fn stress_concurrent_edits(store: &Arc<RecordStore>, config: &StressConfig) -> StressTestResult {
    seed_records(store, config);

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|thread| {
            let store = Arc::clone(store);
            let config = config.clone();
            thread::spawn(move || {
                let mut successful = 0usize;
                let mut failed = 0usize;
                for edit in 0..config.edits_per_thread {
                    let index = edit % config.records_per_thread.max(1);
                    let id = record_id(thread, index, &config);
                    let result = store.get("Patient", &id).map(|row| {
                        store.update("Patient", &id, renamed(&row.payload, &format!("{thread}-{edit}")))
                    });
                    match result {
                        Some(Ok(_)) => successful += 1,
                        _ => failed += 1,
                    }
                }
                (successful, failed)
            })
        })
        .collect();

    let (successful, failed) = handles
        .into_iter()
        .map(|handle| handle.join().unwrap_or((0, config.edits_per_thread)))
        .fold((0, 0), |(s, f), (ts, tf)| (s + ts, f + tf));

    StressTestResult::new(successful, failed, start.elapsed())
}
