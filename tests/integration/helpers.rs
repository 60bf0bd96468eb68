//! Helper types and functions for integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use cloudwatchmetricbeat::{
    MetricSample,
    batch::Batch,
    beat::{Beat, Components},
    config::BeatSettings,
    sink::{Sink, SinkError, SinkResult},
    source::{AdapterError, AdapterResult, MetricSource},
};
use serde_json::json;

/// Settings small enough to keep tests fast
pub fn fast_settings() -> BeatSettings {
    let mut settings = BeatSettings {
        period: Some(Duration::from_secs(3600)),
        drain_timeout: Duration::from_secs(5),
        ..BeatSettings::default()
    };
    settings.shipper.max_retries = 2;
    settings.shipper.retry_backoff = Duration::from_millis(1);
    settings.shipper.retry_backoff_max = Duration::from_millis(2);
    settings
}

pub fn beat_with(
    sources: Vec<Arc<dyn MetricSource>>,
    sink: Arc<dyn Sink>,
    settings: BeatSettings,
) -> Beat {
    Beat::new(
        "testbeat",
        settings,
        Components {
            sources,
            sink,
            spill: None,
        },
    )
}

pub fn sample(name: &str, value: f64) -> MetricSample {
    MetricSample::new(name, value, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        .with_tag("region", "eu-west-1")
        .with_tag("resource_id", "db-1")
}

/// Returns the same samples on every poll
pub struct StaticSource {
    samples: Vec<MetricSample>,
    pub polls: AtomicUsize,
}

impl StaticSource {
    pub fn new(samples: Vec<MetricSample>) -> Arc<Self> {
        Arc::new(Self {
            samples,
            polls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MetricSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn poll(&self) -> AdapterResult<Vec<MetricSample>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.samples.clone())
    }
}

/// Fails every poll with a transient error
pub struct FailingSource;

#[async_trait]
impl MetricSource for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    async fn poll(&self) -> AdapterResult<Vec<MetricSample>> {
        Err(AdapterError::transient("endpoint timed out"))
    }
}

/// Rejects every publish
pub struct DownSink;

#[async_trait]
impl Sink for DownSink {
    fn name(&self) -> &str {
        "down"
    }

    async fn publish(&self, _batch: &Batch) -> SinkResult<()> {
        Err(SinkError::Unavailable("connection refused".to_string()))
    }
}

/// Body the statistics gateway answers with
pub fn datapoints_json() -> serde_json::Value {
    json!({
        "datapoints": [
            {
                "timestamp": "2024-03-01T11:50:00Z",
                "average": 10.0,
                "maximum": 20.0
            },
            {
                "timestamp": "2024-03-01T11:55:00Z",
                "average": 42.5,
                "maximum": 97.0,
                "sample_count": 5.0
            }
        ]
    })
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
