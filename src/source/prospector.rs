//! CloudWatch-style statistics for one prospector
//!
//! A prospector is a named group of metrics. On every poll each metric is
//! turned into a [`StatisticsRequest`] covering the window
//! `[now - delay - range, now - delay]`, the latest datapoint of the answer is
//! picked and every statistic present on it becomes one sample:
//!
//! ```text
//! CPUUtilization + Average  →  cpu_utilization.avg
//! CPUUtilization + Maximum  →  cpu_utilization.max
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::MetricSample;
use crate::config::{ResolvedMetric, ResolvedProspector};
use crate::util::to_snake;

use super::{AdapterError, AdapterResult, MetricSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

/// Parameters of a single statistics lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsRequest {
    pub region: String,
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
    pub statistics: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Granularity in seconds
    pub period: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    pub average: Option<f64>,
    pub sum: Option<f64>,
    pub maximum: Option<f64>,
    pub minimum: Option<f64>,
    pub sample_count: Option<f64>,
}

/// Provider of metric statistics (a CloudWatch client or a gateway to one)
#[async_trait]
pub trait StatisticsProvider: Send + Sync {
    async fn get_metric_statistics(
        &self,
        request: &StatisticsRequest,
    ) -> AdapterResult<Vec<Datapoint>>;
}

pub struct ProspectorSource {
    prospector: ResolvedProspector,
    provider: Arc<dyn StatisticsProvider>,
}

impl ProspectorSource {
    pub fn new(prospector: ResolvedProspector, provider: Arc<dyn StatisticsProvider>) -> Self {
        Self {
            prospector,
            provider,
        }
    }

    pub fn build_request(
        &self,
        metric: &ResolvedMetric,
        now: DateTime<Utc>,
    ) -> AdapterResult<StatisticsRequest> {
        let window = |offset| TimeDelta::from_std(offset).ok();
        let end_time = window(metric.delay).and_then(|delay| now.checked_sub_signed(delay));
        let start_time = end_time
            .zip(window(metric.range))
            .and_then(|(end, range)| end.checked_sub_signed(range));
        let (Some(start_time), Some(end_time)) = (start_time, end_time) else {
            return Err(AdapterError::permanent(format!(
                "request window of {} (delay {:?}, range {:?}) is out of range",
                metric.metric_name, metric.delay, metric.range
            )));
        };

        let dimensions = metric
            .dimensions_select
            .iter()
            .flat_map(|(name, values)| {
                values.iter().map(move |value| Dimension {
                    name: name.clone(),
                    value: value.clone(),
                })
            })
            .collect();

        Ok(StatisticsRequest {
            region: self.prospector.region.clone(),
            namespace: metric.namespace.clone(),
            metric_name: metric.metric_name.clone(),
            dimensions,
            statistics: metric.statistics.clone(),
            start_time,
            end_time,
            period: metric.period.as_secs(),
        })
    }

    async fn fetch_metric(
        &self,
        metric: &ResolvedMetric,
        now: DateTime<Utc>,
    ) -> AdapterResult<Vec<MetricSample>> {
        let request = self.build_request(metric, now)?;
        trace!("making request: {request:?}");

        let datapoints = self.provider.get_metric_statistics(&request).await?;

        let Some(latest) = latest_datapoint(&datapoints) else {
            debug!(
                "no datapoints for {}/{}, nothing to publish",
                metric.namespace, metric.metric_name
            );
            return Ok(vec![]);
        };

        Ok(self.samples_from_datapoint(&request, latest))
    }

    fn samples_from_datapoint(
        &self,
        request: &StatisticsRequest,
        datapoint: &Datapoint,
    ) -> Vec<MetricSample> {
        let base = to_snake(&request.metric_name);

        let mut template = MetricSample::new(String::new(), 0.0, datapoint.timestamp)
            .with_tag("prospector", &self.prospector.id)
            .with_tag("namespace", &request.namespace)
            .with_tag("region", &request.region);

        // Only the first selected dimension identifies the resource.
        if let Some(dimension) = request.dimensions.first() {
            template = template
                .with_tag("resource_id_type", to_snake(&dimension.name))
                .with_tag("resource_id", &dimension.value);
        }

        [
            ("sum", datapoint.sum),
            ("avg", datapoint.average),
            ("max", datapoint.maximum),
            ("min", datapoint.minimum),
            ("count", datapoint.sample_count),
        ]
        .into_iter()
        .filter_map(|(suffix, value)| {
            value.map(|value| MetricSample {
                name: format!("{base}.{suffix}"),
                value,
                ..template.clone()
            })
        })
        .collect()
    }
}

pub fn latest_datapoint(datapoints: &[Datapoint]) -> Option<&Datapoint> {
    datapoints.iter().max_by_key(|dp| dp.timestamp)
}

#[async_trait]
impl MetricSource for ProspectorSource {
    fn name(&self) -> &str {
        &self.prospector.id
    }

    /// Poll every metric of the prospector.
    ///
    /// A failing metric does not hide the others; the poll only fails when
    /// no metric succeeded. A permanent error is reported only if every
    /// failure was permanent.
    #[instrument(skip(self), fields(prospector = %self.prospector.id))]
    async fn poll(&self) -> AdapterResult<Vec<MetricSample>> {
        let now = Utc::now();
        let results = futures::future::join_all(
            self.prospector
                .metrics
                .iter()
                .map(|metric| self.fetch_metric(metric, now)),
        )
        .await;

        let mut samples = vec![];
        let mut errors = vec![];
        let mut succeeded = 0;

        for (metric, result) in self.prospector.metrics.iter().zip(results) {
            match result {
                Ok(metric_samples) => {
                    succeeded += 1;
                    samples.extend(metric_samples);
                }
                Err(e) => {
                    warn!("failed to fetch {}/{}: {e}", metric.namespace, metric.metric_name);
                    errors.push(e);
                }
            }
        }

        if succeeded == 0 && !errors.is_empty() {
            let all_permanent = errors.iter().all(AdapterError::is_permanent);
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(if all_permanent {
                AdapterError::permanent(message)
            } else {
                AdapterError::transient(message)
            });
        }

        Ok(samples)
    }
}
