//! Concurrency tests
//!
//! These tests verify behavior under concurrent use:
//! - Many tasks stopping the same beat
//! - A slow output behind a small queue
//! - Flush timing while samples keep arriving

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cloudwatchmetricbeat::{
    batch::Batch,
    beat::LifecycleState,
    sink::{Sink, SinkResult, memory::MemorySink},
    source::MetricSource,
};

use crate::helpers::*;

/// Takes a while to accept each batch and remembers batch sizes
#[derive(Default)]
struct SlowSink {
    delay: Duration,
    inner: MemorySink,
    batch_sizes: Mutex<Vec<usize>>,
}

#[async_trait]
impl Sink for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    async fn publish(&self, batch: &Batch) -> SinkResult<()> {
        tokio::time::sleep(self.delay).await;
        self.batch_sizes.lock().unwrap().push(batch.len());
        self.inner.publish(batch).await
    }
}

#[tokio::test]
async fn test_concurrent_stops_run_one_drain() {
    let sink = Arc::new(MemorySink::new());
    let beat = Arc::new(beat_with(
        vec![StaticSource::new(vec![sample("a", 1.0)]) as Arc<dyn MetricSource>],
        sink.clone(),
        fast_settings(),
    ));
    beat.start().await.unwrap();

    let mut tasks = vec![];
    for _ in 0..8 {
        let beat = beat.clone();
        tasks.push(tokio::spawn(async move { beat.stop().await }));
    }

    let reports: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|result| result.unwrap())
        .collect();

    assert!(reports.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(sink.close_count(), 1);
    assert_eq!(beat.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_slow_sink_drops_oldest_and_accounts_for_every_sample() {
    let sink = Arc::new(SlowSink {
        delay: Duration::from_millis(30),
        ..SlowSink::default()
    });
    let mut settings = fast_settings();
    settings.shipper.batch_size = 1;
    settings.shipper.queue_capacity = 2;
    let beat = beat_with(
        vec![StaticSource::new(vec![sample("a", 1.0)]) as Arc<dyn MetricSource>],
        sink.clone(),
        settings,
    );
    beat.start().await.unwrap();

    for _ in 0..20 {
        beat.poll_now().await.unwrap();
    }
    let report = beat.stop().await;

    assert_eq!(report.exit_code(), 0);
    assert!(report.stats.queue_dropped_samples > 0);
    assert_eq!(
        report.stats.samples_enqueued,
        report.stats.samples_shipped + report.stats.queue_dropped_samples
    );
    assert_eq!(sink.inner.samples().len() as u64, report.stats.samples_shipped);
}

#[tokio::test]
async fn test_batches_never_exceed_batch_size() {
    let sink = Arc::new(SlowSink::default());
    let mut settings = fast_settings();
    settings.shipper.batch_size = 4;
    settings.shipper.max_batch_age = Duration::from_millis(50);
    let samples = (0..7).map(|i| sample(&format!("m{i}"), i as f64)).collect();
    let beat = beat_with(
        vec![StaticSource::new(samples) as Arc<dyn MetricSource>],
        sink.clone(),
        settings,
    );
    beat.start().await.unwrap();

    let started = Instant::now();
    for _ in 0..3 {
        beat.poll_now().await.unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || sink.inner.samples().len() == 28).await);
    // The leftover partial batch goes out on the age trigger
    assert!(started.elapsed() < Duration::from_secs(1));

    beat.stop().await;

    let sizes = sink.batch_sizes.lock().unwrap().clone();
    assert!(sizes.iter().all(|&size| size <= 4), "batch sizes: {sizes:?}");
    assert_eq!(sizes.iter().sum::<usize>(), 28);
}
