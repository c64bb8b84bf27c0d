//! Per-sink counters, shared between the worker and its handle.
//!
//! Every increment is also emitted as a structured `tracing` event on the
//! `metrics` target.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SinkStats {
    retry_batches: AtomicU64,
    not_my_vbucket: AtomicU64,
    batches_done: AtomicU64,
    ops_sent: AtomicU64,
    ops_skipped: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub retry_batches: u64,
    pub not_my_vbucket: u64,
    pub batches_done: u64,
    pub ops_sent: u64,
    pub ops_skipped: u64,
}

fn bump(counter: &AtomicU64, name: &'static str, by: u64) {
    let total = counter.fetch_add(by, Ordering::Relaxed) + by;
    tracing::debug!(target: "metrics", metric = name, value = total, delta = by);
}

impl SinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_retry_batch(&self) {
        bump(&self.retry_batches, "sink_retry_batch", 1);
    }

    pub fn record_not_my_vbucket(&self) {
        bump(&self.not_my_vbucket, "sink_not_my_vbucket", 1);
    }

    pub fn record_batch_done(&self) {
        bump(&self.batches_done, "sink_batch_done", 1);
    }

    pub fn record_ops_sent(&self, count: u64) {
        if count > 0 {
            bump(&self.ops_sent, "sink_ops_sent", count);
        }
    }

    pub fn record_ops_skipped(&self, count: u64) {
        if count > 0 {
            bump(&self.ops_skipped, "sink_ops_skipped", count);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            retry_batches: self.retry_batches.load(Ordering::Relaxed),
            not_my_vbucket: self.not_my_vbucket.load(Ordering::Relaxed),
            batches_done: self.batches_done.load(Ordering::Relaxed),
            ops_sent: self.ops_sent.load(Ordering::Relaxed),
            ops_skipped: self.ops_skipped.load(Ordering::Relaxed),
        }
    }
}
