use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::trace;

use crate::BEAT_NAME;
use crate::queue::Backpressure;

const DEFAULT_METRIC_PERIOD_SECONDS: u64 = 60;
const DEFAULT_METRIC_DELAY_SECONDS: u64 = 300;
const DEFAULT_METRIC_RANGE_SECONDS: u64 = 600;
const DEFAULT_STATISTIC: &str = "Average";
/// CloudWatch keeps datapoints for 455 days
const MAX_METRIC_LOOKBACK_SECONDS: u64 = 455 * 24 * 60 * 60;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Seconds between two polls. `0` polls once and then stops the beat.
    #[serde(default = "default_period")]
    pub period: u64,

    #[serde(default = "default_region")]
    pub aws_region: String,

    #[serde(default)]
    pub prospectors: Vec<Prospector>,

    /// Gateway answering statistics requests for the prospectors
    pub statistics_endpoint: Option<String>,

    /// Also poll cpu/memory/load of the local host
    #[serde(default)]
    pub system_metrics: bool,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub shipper: ShipperConfig,

    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Prospector {
    pub id: String,
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Metric {
    pub aws_namespace: String,
    pub aws_metric_name: String,
    #[serde(default)]
    pub aws_statistics: Vec<String>,
    /// Dimension name to the values to select
    #[serde(default)]
    pub aws_dimensions_select: BTreeMap<String, Vec<String>>,
    /// Granularity of the returned datapoints, at least 60 and a multiple of 60
    pub period_seconds: Option<u64>,
    pub delay_seconds: Option<u64>,
    pub range_seconds: Option<u64>,
}

/// Where shipped samples are written
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputConfig {
    #[default]
    Console,
    File { path: PathBuf },
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct LoggingConfig {
    /// Log file path, or a glob such as `logs/*` naming the log directory
    pub path: Option<String>,
    pub level: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    Spill,
    #[default]
    Drop,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ShipperConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_batch_age_ms")]
    pub max_batch_age_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub backpressure: Backpressure,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    pub spill_dir: Option<PathBuf>,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_batch_age_ms: default_max_batch_age_ms(),
            queue_capacity: default_queue_capacity(),
            backpressure: Backpressure::default(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
            on_failure: FailurePolicy::default(),
            spill_dir: None,
        }
    }
}

fn default_period() -> u64 {
    60
}

fn default_region() -> String {
    String::from("us-east-1")
}

fn default_drain_timeout_secs() -> u64 {
    10
}

fn default_batch_size() -> usize {
    100
}

fn default_max_batch_age_ms() -> u64 {
    5_000
}

fn default_queue_capacity() -> usize {
    32
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_retry_backoff_max_ms() -> u64 {
    10_000
}

/// Shipper settings with defaults applied and units resolved
#[derive(Debug, Clone)]
pub struct ShipperSettings {
    pub batch_size: usize,
    pub max_batch_age: Duration,
    pub queue_capacity: usize,
    pub backpressure: Backpressure,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub retry_backoff_max: Duration,
    pub on_failure: FailurePolicy,
}

impl Default for ShipperSettings {
    fn default() -> Self {
        ShipperConfig::default().resolve()
    }
}

impl ShipperConfig {
    fn resolve(&self) -> ShipperSettings {
        ShipperSettings {
            batch_size: self.batch_size.max(1),
            max_batch_age: Duration::from_millis(self.max_batch_age_ms.max(1)),
            queue_capacity: self.queue_capacity.max(1),
            backpressure: self.backpressure,
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            retry_backoff_max: Duration::from_millis(self.retry_backoff_max_ms),
            on_failure: self.on_failure,
        }
    }
}

/// Runtime settings of the beat itself
#[derive(Debug, Clone)]
pub struct BeatSettings {
    /// `None` runs a single poll and then stops
    pub period: Option<Duration>,
    pub drain_timeout: Duration,
    pub shipper: ShipperSettings,
}

impl Default for BeatSettings {
    fn default() -> Self {
        Self {
            period: Some(Duration::from_secs(default_period())),
            drain_timeout: Duration::from_secs(default_drain_timeout_secs()),
            shipper: ShipperSettings::default(),
        }
    }
}

/// A metric with every default filled in
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetric {
    pub namespace: String,
    pub metric_name: String,
    pub statistics: Vec<String>,
    pub dimensions_select: BTreeMap<String, Vec<String>>,
    pub period: Duration,
    pub delay: Duration,
    pub range: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProspector {
    pub id: String,
    pub region: String,
    pub metrics: Vec<ResolvedMetric>,
}

impl Metric {
    pub fn resolve(&self) -> anyhow::Result<ResolvedMetric> {
        let period = self.period_seconds.unwrap_or(DEFAULT_METRIC_PERIOD_SECONDS);
        if period == 0 || period % 60 != 0 {
            bail!(
                "period_seconds of {} must be a positive multiple of 60, got {period}",
                self.aws_metric_name
            );
        }

        let delay = self.delay_seconds.unwrap_or(DEFAULT_METRIC_DELAY_SECONDS);
        let range = self.range_seconds.unwrap_or(DEFAULT_METRIC_RANGE_SECONDS);
        if delay
            .checked_add(range)
            .is_none_or(|lookback| lookback > MAX_METRIC_LOOKBACK_SECONDS)
        {
            bail!(
                "delay_seconds + range_seconds of {} must be at most {}s, got {delay} + {range}",
                self.aws_metric_name,
                MAX_METRIC_LOOKBACK_SECONDS
            );
        }

        let statistics = if self.aws_statistics.is_empty() {
            vec![DEFAULT_STATISTIC.to_string()]
        } else {
            self.aws_statistics.clone()
        };

        Ok(ResolvedMetric {
            namespace: self.aws_namespace.clone(),
            metric_name: self.aws_metric_name.clone(),
            statistics,
            dimensions_select: self.aws_dimensions_select.clone(),
            period: Duration::from_secs(period),
            delay: Duration::from_secs(delay),
            range: Duration::from_secs(range),
        })
    }
}

impl Config {
    pub fn settings(&self) -> anyhow::Result<BeatSettings> {
        if self.shipper.on_failure == FailurePolicy::Spill && self.shipper.spill_dir.is_none() {
            bail!("shipper.on_failure is 'spill' but no shipper.spill_dir is configured");
        }

        Ok(BeatSettings {
            period: (self.period > 0).then(|| Duration::from_secs(self.period)),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            shipper: self.shipper.resolve(),
        })
    }

    pub fn resolved_prospectors(&self) -> anyhow::Result<Vec<ResolvedProspector>> {
        self.prospectors
            .iter()
            .map(|prospector| {
                let metrics = prospector
                    .metrics
                    .iter()
                    .map(Metric::resolve)
                    .collect::<anyhow::Result<Vec<_>>>()
                    .with_context(|| format!("invalid prospector '{}'", prospector.id))?;

                Ok(ResolvedProspector {
                    id: prospector.id.clone(),
                    region: self.aws_region.clone(),
                    metrics,
                })
            })
            .collect()
    }
}

impl LoggingConfig {
    /// Resolve the configured path to the file logs are written to.
    ///
    /// A path whose last component contains a glob character names a
    /// directory; the beat then logs to `<dir>/cloudwatchmetricbeat`.
    pub fn log_file(&self) -> Option<PathBuf> {
        let path = Path::new(self.path.as_deref()?);
        let is_glob = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.contains(['*', '?', '[']));

        if is_glob {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            Some(dir.join(BEAT_NAME))
        } else {
            Some(path.to_path_buf())
        }
    }
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {}", path.display()))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
