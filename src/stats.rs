//! Process-wide counters
//!
//! Counters are plain atomics shared by the scheduler, the shipper and the
//! lifecycle controller. They only ever increase.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    /// Successful source polls
    pub polls: Counter,
    pub poll_errors: Counter,
    /// Ticks skipped because a poll outlasted the period
    pub ticks_skipped: Counter,
    pub samples_enqueued: Counter,
    /// Chunks evicted by the drop-oldest backpressure policy
    pub queue_dropped_batches: Counter,
    pub queue_dropped_samples: Counter,
    pub flushes: Counter,
    pub flush_retries: Counter,
    pub samples_shipped: Counter,
    pub batches_spilled: Counter,
    pub samples_spilled: Counter,
    pub batches_dropped: Counter,
    pub samples_dropped: Counter,
    pub drain_failures: Counter,
}

impl Counters {
    pub fn snapshot(&self) -> BeatStats {
        BeatStats {
            polls: self.polls.get(),
            poll_errors: self.poll_errors.get(),
            ticks_skipped: self.ticks_skipped.get(),
            samples_enqueued: self.samples_enqueued.get(),
            queue_dropped_batches: self.queue_dropped_batches.get(),
            queue_dropped_samples: self.queue_dropped_samples.get(),
            flushes: self.flushes.get(),
            flush_retries: self.flush_retries.get(),
            samples_shipped: self.samples_shipped.get(),
            batches_spilled: self.batches_spilled.get(),
            samples_spilled: self.samples_spilled.get(),
            batches_dropped: self.batches_dropped.get(),
            samples_dropped: self.samples_dropped.get(),
            drain_failures: self.drain_failures.get(),
        }
    }
}

/// Point-in-time copy of [`Counters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BeatStats {
    pub polls: u64,
    pub poll_errors: u64,
    pub ticks_skipped: u64,
    pub samples_enqueued: u64,
    pub queue_dropped_batches: u64,
    pub queue_dropped_samples: u64,
    pub flushes: u64,
    pub flush_retries: u64,
    pub samples_shipped: u64,
    pub batches_spilled: u64,
    pub samples_spilled: u64,
    pub batches_dropped: u64,
    pub samples_dropped: u64,
    pub drain_failures: u64,
}
