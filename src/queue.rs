//! Bounded handoff between the scheduler and the shipper
//!
//! Each element is the sample chunk produced by one source poll. The queue is
//! the only state the two tasks share, so it owns all of their
//! synchronisation: a short-lived mutex around the deque and two `Notify`s,
//! one for "items available" and one for "space available".
//!
//! What happens when the queue is full is decided by [`Backpressure`]:
//!
//! - `DropOldest`: the oldest chunk is evicted and reported to the producer.
//!   The scheduler never waits on the shipper.
//! - `Block`: the producer waits until the shipper frees a slot or the queue
//!   is closed. The scheduler abandons the wait when it is stopped.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde::Deserialize;
use tokio::sync::Notify;

use crate::MetricSample;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    #[default]
    DropOldest,
    Block,
}

/// Result of [`SampleQueue::push`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// Accepted after evicting the oldest chunk (carrying this many samples)
    DroppedOldest(usize),
    /// The queue is closed; the chunk was discarded
    Closed,
}

struct Inner {
    chunks: VecDeque<Vec<MetricSample>>,
    closed: bool,
}

pub struct SampleQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    policy: Backpressure,
    items: Notify,
    space: Notify,
}

impl SampleQueue {
    pub fn new(capacity: usize, policy: Backpressure) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                chunks: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            policy,
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing in the critical sections can panic halfway, so a poisoned
        // lock still guards a consistent deque.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn push(&self, samples: Vec<MetricSample>) -> PushOutcome {
        let mut samples = Some(samples);

        loop {
            let space = self.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return PushOutcome::Closed;
                }

                if inner.chunks.len() < self.capacity {
                    inner.chunks.extend(samples.take());
                    drop(inner);
                    self.items.notify_one();
                    return PushOutcome::Accepted;
                }

                if self.policy == Backpressure::DropOldest {
                    let evicted = inner.chunks.pop_front().map_or(0, |chunk| chunk.len());
                    inner.chunks.extend(samples.take());
                    drop(inner);
                    self.items.notify_one();
                    return PushOutcome::DroppedOldest(evicted);
                }
            }

            space.await;
        }
    }

    /// Wait for the next chunk. Returns `None` once the queue is closed and
    /// empty. Cancel safe: a chunk is only removed when it is returned.
    pub async fn pop(&self) -> Option<Vec<MetricSample>> {
        loop {
            let items = self.items.notified();
            tokio::pin!(items);
            items.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(chunk) = inner.chunks.pop_front() {
                    drop(inner);
                    self.space.notify_one();
                    return Some(chunk);
                }
                if inner.closed {
                    return None;
                }
            }

            items.await;
        }
    }

    /// Stop accepting chunks and wake every waiter. Chunks already queued can
    /// still be popped.
    pub fn close(&self) {
        self.lock().closed = true;
        self.items.notify_waiters();
        self.space.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total samples waiting across all queued chunks
    pub fn pending_samples(&self) -> usize {
        self.lock().chunks.iter().map(Vec::len).sum()
    }
}
