//! Batches of samples owned by the shipper

use std::time::Duration;

use tokio::time::Instant;

use crate::MetricSample;

/// An ordered group of samples that is delivered as a whole.
///
/// The age of a batch is measured from the arrival of its first sample, not
/// from when the (possibly empty) batch was created.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    samples: Vec<MetricSample>,
    first_arrival: Option<Instant>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            first_arrival: None,
        }
    }

    /// Rebuild a batch from samples recovered elsewhere (e.g. the spill area).
    pub fn from_samples(samples: Vec<MetricSample>) -> Self {
        let first_arrival = (!samples.is_empty()).then(Instant::now);
        Self {
            samples,
            first_arrival,
        }
    }

    pub fn push(&mut self, sample: MetricSample) {
        if self.first_arrival.is_none() {
            self.first_arrival = Some(Instant::now());
        }
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<MetricSample> {
        self.samples
    }

    /// Instant at which this batch must be flushed at the latest.
    pub fn deadline(&self, max_age: Duration) -> Option<Instant> {
        self.first_arrival.map(|first| first + max_age)
    }

    pub fn is_full(&self, max_size: usize) -> bool {
        self.samples.len() >= max_size
    }
}
