//! Lifecycle of a running beat
//!
//! A [`Beat`] owns the queue, the counters and both actors. It moves through
//! [`LifecycleState`] in one direction only:
//!
//! ```text
//! Starting ──start()──► Running ──stop()──► Draining ──► Stopped
//!     │                                                    ▲
//!     └──────────────── startup failure ───────────────────┘
//! ```
//!
//! `stop()` can be called any number of times from any number of tasks. The
//! first call runs the drain and every caller gets the same [`ShutdownReport`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::{Mutex, OnceCell, watch};
use tracing::{debug, error, info, trace, warn};

use crate::BEAT_NAME;
use crate::actors::PipelineContext;
use crate::actors::scheduler::SchedulerHandle;
use crate::actors::shipper::ShipperHandle;
use crate::config::{BeatSettings, Config, OutputConfig};
use crate::queue::SampleQueue;
use crate::sink::Sink;
use crate::sink::console::ConsoleSink;
use crate::sink::file::FileSink;
use crate::source::MetricSource;
use crate::source::http::HttpStatisticsProvider;
use crate::source::prospector::{ProspectorSource, StatisticsProvider};
use crate::source::system::SystemSource;
use crate::spill::{DirectorySpill, Spill};
use crate::stats::{BeatStats, Counters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Everything the pipeline reads from and writes to
pub struct Components {
    pub sources: Vec<Arc<dyn MetricSource>>,
    pub sink: Arc<dyn Sink>,
    pub spill: Option<Arc<dyn Spill>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Everything still buffered was delivered or spilled in time
    Clean {
        samples_flushed: u64,
        samples_spilled: u64,
    },
    /// The drain finished but batches were dropped on the way
    DataLoss { samples_lost: u64 },
    /// The shipper task died while draining
    ShipperFailed,
    /// The drain did not finish within the drain timeout
    TimedOut,
}

impl ShutdownOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, ShutdownOutcome::Clean { .. })
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_clean() { 0 } else { 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub outcome: ShutdownOutcome,
    pub stats: BeatStats,
}

impl ShutdownReport {
    pub fn exit_code(&self) -> u8 {
        self.outcome.exit_code()
    }
}

struct Actors {
    scheduler: SchedulerHandle,
    shipper: ShipperHandle,
    sink: Arc<dyn Sink>,
}

pub struct Beat {
    name: String,
    settings: BeatSettings,
    queue: Arc<SampleQueue>,
    counters: Arc<Counters>,
    state: watch::Sender<LifecycleState>,
    /// Cooperative stop flag read by both actors
    shutdown: watch::Sender<bool>,
    /// Raised by signal handlers and one-shot mode, answered by `stop()`
    stop_request: Arc<watch::Sender<bool>>,
    components: Mutex<Option<Components>>,
    actors: Mutex<Option<Actors>>,
    report: OnceCell<ShutdownReport>,
}

impl Beat {
    pub fn new(name: impl Into<String>, settings: BeatSettings, components: Components) -> Self {
        let queue = Arc::new(SampleQueue::new(
            settings.shipper.queue_capacity,
            settings.shipper.backpressure,
        ));
        let (state, _) = watch::channel(LifecycleState::Starting);
        let (shutdown, _) = watch::channel(false);
        let (stop_request, _) = watch::channel(false);

        Self {
            name: name.into(),
            settings,
            queue,
            counters: Arc::new(Counters::default()),
            state,
            shutdown,
            stop_request: Arc::new(stop_request),
            components: Mutex::new(Some(components)),
            actors: Mutex::new(None),
            report: OnceCell::new(),
        }
    }

    /// Build a beat with the sources, sink and spill area the config asks for
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = config.settings()?;
        let mut sources: Vec<Arc<dyn MetricSource>> = vec![];

        let prospectors = config.resolved_prospectors()?;
        if !prospectors.is_empty() {
            let endpoint = config
                .statistics_endpoint
                .as_deref()
                .context("prospectors are configured but statistics_endpoint is missing")?;
            let provider: Arc<dyn StatisticsProvider> =
                Arc::new(HttpStatisticsProvider::new(endpoint)?);

            for prospector in prospectors {
                debug!(
                    "prospector '{}' with {} metric(s)",
                    prospector.id,
                    prospector.metrics.len()
                );
                sources.push(Arc::new(ProspectorSource::new(prospector, provider.clone())));
            }
        }

        if config.system_metrics {
            sources.push(Arc::new(SystemSource::new()));
        }

        let sink: Arc<dyn Sink> = match &config.output {
            OutputConfig::Console => Arc::new(ConsoleSink),
            OutputConfig::File { path } => Arc::new(FileSink::new(path)),
        };

        let spill = config
            .shipper
            .spill_dir
            .as_ref()
            .map(|dir| Arc::new(DirectorySpill::new(dir)) as Arc<dyn Spill>);

        Ok(Self::new(
            BEAT_NAME,
            settings,
            Components {
                sources,
                sink,
                spill,
            },
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> BeatStats {
        self.counters.snapshot()
    }

    /// Move forward to `next`. Backward or repeated transitions are refused.
    fn advance(&self, next: LifecycleState) -> bool {
        self.state.send_if_modified(|state| {
            if next > *state {
                debug!("{}: {state:?} -> {next:?}", self.name);
                *state = next;
                true
            } else {
                trace!("{}: refusing transition {state:?} -> {next:?}", self.name);
                false
            }
        })
    }

    /// Open the sink, prepare the spill area and spawn both actors.
    ///
    /// Logs the readiness line once everything is up. Any failure before
    /// that leaves the beat `Stopped`.
    pub async fn start(&self) -> Result<()> {
        // Held until the actors are stored, so a concurrent drain sees either
        // nothing started or everything started.
        let mut slot = self.actors.lock().await;
        if self.state() != LifecycleState::Starting {
            bail!("{} cannot start from state {:?}", self.name, self.state());
        }

        let components = self
            .components
            .lock()
            .await
            .take()
            .with_context(|| format!("{} was already started", self.name))?;

        match self.spawn_pipeline(components).await {
            Ok(actors) => {
                *slot = Some(actors);
                self.advance(LifecycleState::Running);
                info!("{} is running! Hit CTRL-C to stop it.", self.name);
                Ok(())
            }
            Err(e) => {
                self.advance(LifecycleState::Stopped);
                error!("{} failed to start: {e:#}", self.name);
                Err(e)
            }
        }
    }

    async fn spawn_pipeline(&self, components: Components) -> Result<Actors> {
        let Components {
            sources,
            sink,
            spill,
        } = components;

        sink.open()
            .await
            .with_context(|| format!("failed to open output '{}'", sink.name()))?;

        if let Some(spill) = &spill {
            spill
                .prepare()
                .await
                .context("failed to prepare spill directory")?;
        }

        if sources.is_empty() {
            warn!("no metric sources configured, nothing will be polled");
        }

        let context = PipelineContext {
            queue: self.queue.clone(),
            counters: self.counters.clone(),
            shutdown: self.shutdown.subscribe(),
        };

        // Shipper first so nothing is enqueued without a consumer
        let shipper = ShipperHandle::spawn(
            sink.clone(),
            spill,
            self.settings.shipper.clone(),
            context.clone(),
        );
        let scheduler = SchedulerHandle::spawn(
            sources,
            self.settings.period,
            context,
            self.stop_request.clone(),
        );

        Ok(Actors {
            scheduler,
            shipper,
            sink,
        })
    }

    /// Ask for a stop without waiting for it
    pub fn request_stop(&self) {
        self.stop_request.send_replace(true);
    }

    /// Resolves once a stop has been requested
    pub async fn stop_requested(&self) {
        let mut rx = self.stop_request.subscribe();
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// Poll every source now, outside the regular period
    pub async fn poll_now(&self) -> Result<usize> {
        match self.actors.lock().await.as_ref() {
            Some(actors) => actors.scheduler.poll_now().await,
            None => bail!("{} is not running", self.name),
        }
    }

    /// Change the polling period. The next poll is one new period from now.
    pub async fn update_period(&self, period: Duration) -> Result<()> {
        match self.actors.lock().await.as_ref() {
            Some(actors) => actors.scheduler.update_period(period).await,
            None => bail!("{} is not running", self.name),
        }
    }

    /// Flush the shipper's current batch now
    pub async fn flush(&self) -> Result<bool> {
        match self.actors.lock().await.as_ref() {
            Some(actors) => actors.shipper.flush().await,
            None => bail!("{} is not running", self.name),
        }
    }

    /// Drain and stop the beat. Every caller gets the report of the one
    /// drain that actually ran.
    pub async fn stop(&self) -> ShutdownReport {
        *self.report.get_or_init(|| self.drain()).await
    }

    async fn drain(&self) -> ShutdownReport {
        self.request_stop();

        let mut slot = self.actors.lock().await;
        let Some(mut actors) = slot.take() else {
            // Never started, or failed to. Stopped is set under the lock so a
            // start waiting on it refuses to run.
            self.advance(LifecycleState::Stopped);
            return ShutdownReport {
                outcome: ShutdownOutcome::Clean {
                    samples_flushed: 0,
                    samples_spilled: 0,
                },
                stats: self.stats(),
            };
        };

        drop(slot);

        self.advance(LifecycleState::Draining);
        info!("stopping {}", self.name);
        self.shutdown.send_replace(true);

        let drain_timeout = self.settings.drain_timeout;
        let queue = self.queue.clone();
        let drain = async {
            if let Err(e) = actors.scheduler.wait().await {
                warn!("scheduler ended abnormally: {e:#}");
            }
            queue.close();
            actors.shipper.wait().await
        };
        let result = tokio::time::timeout(drain_timeout, drain).await;

        let outcome = match result {
            Ok(Ok(report)) if report.samples_lost == 0 => {
                debug!(
                    "drain complete: {} flushed, {} spilled",
                    report.samples_flushed, report.samples_spilled
                );
                ShutdownOutcome::Clean {
                    samples_flushed: report.samples_flushed,
                    samples_spilled: report.samples_spilled,
                }
            }
            Ok(Ok(report)) => {
                self.counters.drain_failures.incr();
                error!("lost {} samples while draining", report.samples_lost);
                ShutdownOutcome::DataLoss {
                    samples_lost: report.samples_lost,
                }
            }
            Ok(Err(e)) => {
                self.counters.drain_failures.incr();
                error!("shipper failed while draining: {e:#}");
                ShutdownOutcome::ShipperFailed
            }
            Err(_) => {
                self.counters.drain_failures.incr();
                error!(
                    "drain did not finish within {drain_timeout:?}, {} samples still queued",
                    self.queue.pending_samples()
                );
                actors.scheduler.abort();
                actors.shipper.abort();
                ShutdownOutcome::TimedOut
            }
        };

        if outcome != ShutdownOutcome::TimedOut
            && let Err(e) = actors.sink.close().await
        {
            warn!("failed to close output '{}': {e}", actors.sink.name());
        }

        self.advance(LifecycleState::Stopped);
        let stats = self.stats();
        info!("{} stopped ({:?})", self.name, outcome);
        trace!("final stats: {stats:?}");

        ShutdownReport { outcome, stats }
    }
}
