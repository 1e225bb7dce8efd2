//! Metrics definitions for the ingestion workers.
//!
//! This module defines all metrics used throughout the workers.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "messages_consumed_total",
        "Total number of queue deliveries handled, by queue and outcome"
    );
    describe_counter!(
        "blocks_batched_total",
        "Total number of blocks pushed into the block batch"
    );
    describe_counter!(
        "batch_flushes_total",
        "Total number of block batch flushes, by trigger"
    );
    describe_counter!(
        "batch_flush_failures_total",
        "Total number of block batches dropped after a persistence failure"
    );
    describe_counter!(
        "cache_write_failures_total",
        "Total number of failed cache writes, by tier"
    );
    describe_counter!(
        "validator_syncs_total",
        "Total number of validator sync cycles, by result"
    );
    describe_counter!(
        "pending_transactions_seen_total",
        "Total number of pending transaction notifications received"
    );
    describe_histogram!(
        "block_processing_duration_seconds",
        "Time taken to process a block delivery in seconds"
    );
}

/// Record a handled delivery.
///
/// # Arguments
/// * `queue` - The queue the delivery came from
/// * `outcome` - `"ack"`, `"requeue"` or `"drop"`
pub fn record_message_consumed(queue: &str, outcome: &str) {
    counter!("messages_consumed_total", "queue" => queue.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

/// Record a block pushed into the batch.
pub fn record_block_batched() {
    counter!("blocks_batched_total").increment(1);
}

/// Record a batch flush.
///
/// # Arguments
/// * `trigger` - `"size"`, `"timeout"` or `"shutdown"`
/// * `size` - Number of items flushed
pub fn record_batch_flush(trigger: &'static str, size: usize) {
    counter!("batch_flushes_total", "trigger" => trigger).increment(1);
    histogram!("batch_flush_size", "trigger" => trigger).record(size as f64);
}

/// Record a dropped batch.
pub fn record_batch_flush_failure(size: usize) {
    counter!("batch_flush_failures_total").increment(1);
    counter!("batch_items_dropped_total").increment(size as u64);
}

/// Record a failed cache write.
///
/// # Arguments
/// * `tier` - `"latest"` or `"immutable"`
pub fn record_cache_write_failure(tier: &'static str) {
    counter!("cache_write_failures_total", "tier" => tier).increment(1);
}

/// Record a validator sync cycle.
pub fn record_validator_sync(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("validator_syncs_total", "result" => result).increment(1);
}

/// Record a pending transaction notification.
pub fn record_pending_transaction() {
    counter!("pending_transactions_seen_total").increment(1);
}

/// Record block processing duration.
pub fn record_block_processing_duration(duration_secs: f64) {
    histogram!("block_processing_duration_seconds").record(duration_secs);
}

/// A timer that automatically records duration when dropped.
pub struct ProcessingTimer {
    start: Instant,
}

impl ProcessingTimer {
    /// Start a new processing timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for ProcessingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_block_processing_duration(duration);
    }
}
