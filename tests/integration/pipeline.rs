//! End-to-end tests of the pipeline: source -> queue -> shipper -> sink

use std::sync::Arc;
use std::time::Duration;

use cloudwatchmetricbeat::{
    MetricSample,
    beat::{Beat, Components, LifecycleState},
    config::{Config, FailurePolicy},
    sink::memory::MemorySink,
    source::MetricSource,
    spill::{DirectorySpill, Spill},
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_round_trip_preserves_samples() {
    let samples = vec![sample("cpu_utilization.avg", 42.5), sample("free_storage_space.min", 1e9)];
    let source = StaticSource::new(samples.clone());
    let sink = Arc::new(MemorySink::new());
    let beat = beat_with(vec![source as Arc<dyn MetricSource>], sink.clone(), fast_settings());

    beat.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || beat.stats().samples_enqueued == 2).await);
    let report = beat.stop().await;

    assert_eq!(report.exit_code(), 0);
    assert_eq!(sink.samples(), samples);
    assert_eq!(report.stats.samples_shipped, 2);
}

#[tokio::test]
async fn test_poll_now_and_flush_through_the_beat() {
    let source = StaticSource::new(vec![sample("requests", 1.0)]);
    let sink = Arc::new(MemorySink::new());
    let beat = beat_with(vec![source as Arc<dyn MetricSource>], sink.clone(), fast_settings());
    beat.start().await.unwrap();

    let enqueued = beat.poll_now().await.unwrap();
    assert_eq!(enqueued, 1);
    assert!(wait_until(Duration::from_secs(2), || beat.stats().samples_enqueued >= 2).await);
    // Let the shipper pick up both chunks before forcing the flush
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(beat.flush().await.unwrap());

    assert_eq!(sink.samples().len(), 2);
    beat.stop().await;
}

#[tokio::test]
async fn test_prospector_through_gateway_to_file() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/statistics"))
        .and(body_partial_json(json!({
            "namespace": "AWS/RDS",
            "metric_name": "CPUUtilization",
            "dimensions": [{"name": "DBInstanceIdentifier", "value": "db-1"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(datapoints_json()))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out").join("metrics.jsonl");
    let config: Config = serde_json::from_value(json!({
        "period": 0,
        "aws_region": "eu-west-1",
        "statistics_endpoint": format!("{}/statistics", mock_server.uri()),
        "prospectors": [{
            "id": "rds",
            "metrics": [{
                "aws_namespace": "AWS/RDS",
                "aws_metric_name": "CPUUtilization",
                "aws_statistics": ["Average", "Maximum", "SampleCount"],
                "aws_dimensions_select": {"DBInstanceIdentifier": ["db-1"]}
            }]
        }],
        "output": {"type": "file", "path": output}
    }))
    .unwrap();

    let beat = Beat::from_config(&config).unwrap();
    beat.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), beat.stop_requested())
        .await
        .expect("one-shot beat should request a stop");
    let report = beat.stop().await;
    assert_eq!(report.exit_code(), 0);

    let content = std::fs::read_to_string(&output).unwrap();
    let written: Vec<MetricSample> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    let names: Vec<&str> = written.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["cpu_utilization.avg", "cpu_utilization.max", "cpu_utilization.count"]
    );
    assert_eq!(written[0].value, 42.5);
    assert_eq!(written[0].timestamp.to_rfc3339(), "2024-03-01T11:55:00+00:00");

    let tags = &written[0].tags;
    assert_eq!(tags["prospector"], "rds");
    assert_eq!(tags["namespace"], "AWS/RDS");
    assert_eq!(tags["region"], "eu-west-1");
    assert_eq!(tags["resource_id_type"], "db_instance_identifier");
    assert_eq!(tags["resource_id"], "db-1");
}

#[tokio::test]
async fn test_spilled_batches_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = fast_settings();
    settings.shipper.on_failure = FailurePolicy::Spill;

    let samples = vec![sample("a", 1.0), sample("b", 2.0)];

    let first = Beat::new(
        "testbeat",
        settings.clone(),
        Components {
            sources: vec![StaticSource::new(samples.clone()) as Arc<dyn MetricSource>],
            sink: Arc::new(DownSink),
            spill: Some(Arc::new(DirectorySpill::new(dir.path())) as Arc<dyn Spill>),
        },
    );
    first.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || first.stats().samples_enqueued == 2).await);
    let report = first.stop().await;

    // Spilled data is kept, so the drain still counts as clean
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.stats.samples_spilled, 2);
    assert_eq!(first.state(), LifecycleState::Stopped);

    let sink = Arc::new(MemorySink::new());
    let second = Beat::new(
        "testbeat",
        settings,
        Components {
            sources: vec![],
            sink: sink.clone(),
            spill: Some(Arc::new(DirectorySpill::new(dir.path())) as Arc<dyn Spill>),
        },
    );
    second.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || sink.samples().len() == 2).await);
    second.stop().await;

    assert_eq!(sink.samples(), samples);
    // Delivered batches leave nothing behind
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
