//! In-process sink
//!
//! Keeps every published sample in memory. Useful when embedding the beat
//! and as a deterministic output in tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::MetricSample;
use crate::batch::Batch;

use super::{Sink, SinkResult};

#[derive(Debug, Default)]
pub struct MemorySink {
    samples: Mutex<Vec<MetricSample>>,
    publishes: AtomicUsize,
    closes: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples
            .lock()
            .map(|samples| samples.clone())
            .unwrap_or_default()
    }

    /// Number of batches published
    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, batch: &Batch) -> SinkResult<()> {
        if let Ok(mut samples) = self.samples.lock() {
            samples.extend_from_slice(batch.samples());
        }
        self.publishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> SinkResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
