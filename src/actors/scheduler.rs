//! SchedulerActor - Polls metric sources on a fixed period
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → poll all sources → push samples into SampleQueue → [ShipperActor]
//!     ↑
//!     └─── Commands (PollNow, UpdatePeriod), shutdown flag
//! ```
//!
//! A poll is awaited inside the actor loop, so two polls never overlap. Ticks
//! that elapse while a poll is still running are skipped, not queued up.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, error, instrument, trace, warn};

use crate::queue::PushOutcome;
use crate::source::MetricSource;

use super::messages::SchedulerCommand;
use super::{PipelineContext, shutdown_raised};

struct SourceSlot {
    source: Arc<dyn MetricSource>,
    /// Cleared after a permanent error
    enabled: bool,
}

pub struct SchedulerActor {
    sources: Vec<SourceSlot>,

    /// `None` polls once and then asks the beat to stop
    period: Option<Duration>,

    context: PipelineContext,

    command_rx: mpsc::Receiver<SchedulerCommand>,

    /// Used in one-shot mode to ask the beat for a stop
    stop_request: Arc<watch::Sender<bool>>,
}

fn new_ticker(period: Duration, start: Instant) -> Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

impl SchedulerActor {
    pub fn new(
        sources: Vec<Arc<dyn MetricSource>>,
        period: Option<Duration>,
        context: PipelineContext,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        stop_request: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            sources: sources
                .into_iter()
                .map(|source| SourceSlot {
                    source,
                    enabled: true,
                })
                .collect(),
            period,
            context,
            command_rx,
            stop_request,
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until the shutdown flag is raised. The flag is checked at the top
    /// of every cycle and also interrupts a poll in progress, so the actor
    /// stops within one period.
    #[instrument(skip(self), fields(sources = self.sources.len()))]
    pub async fn run(mut self) {
        debug!("starting scheduler actor");
        let mut shutdown = self.context.shutdown.clone();

        let Some(mut period) = self.period else {
            tokio::select! {
                result = self.poll_cycle() => {
                    if let Err(e) = result {
                        error!("single poll failed: {e:#}");
                    }
                }
                _ = shutdown_raised(&mut shutdown) => {}
            }
            debug!("single poll complete, requesting stop");
            self.stop_request.send_replace(true);
            return;
        };

        let mut ticker = new_ticker(period, Instant::now());

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown_raised(&mut shutdown) => break,

                _ = ticker.tick() => {
                    let started = Instant::now();
                    tokio::select! {
                        result = self.poll_cycle() => {
                            if let Err(e) = result {
                                warn!("{e:#}");
                            }
                        }
                        _ = shutdown_raised(&mut shutdown) => {
                            debug!("stop requested during poll, abandoning it");
                            break;
                        }
                    }

                    let elapsed = started.elapsed();
                    if elapsed > period {
                        let skipped = (elapsed.as_nanos() / period.as_nanos()) as u64;
                        self.context.counters.ticks_skipped.add(skipped);
                        warn!(
                            "poll took {elapsed:?}, longer than the {period:?} period; \
                             skipping {skipped} tick(s)"
                        );
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::PollNow { respond_to } => {
                            debug!("received PollNow command");
                            tokio::select! {
                                result = self.poll_cycle() => {
                                    let _ = respond_to.send(result);
                                }
                                _ = shutdown_raised(&mut shutdown) => break,
                            }
                        }

                        SchedulerCommand::UpdatePeriod { period: new_period } => {
                            debug!("updating period to {new_period:?}");
                            period = new_period.max(Duration::from_millis(1));
                            ticker = new_ticker(period, Instant::now() + period);
                        }
                    }
                }
            }
        }

        debug!("scheduler actor stopped");
    }

    /// Poll all enabled sources concurrently and enqueue what they return.
    ///
    /// Source failures are counted and logged but never end the actor.
    /// Returns the number of samples enqueued, or an error if every enabled
    /// source failed.
    async fn poll_cycle(&mut self) -> Result<usize> {
        let enabled: Vec<usize> = (0..self.sources.len())
            .filter(|&i| self.sources[i].enabled)
            .collect();

        if enabled.is_empty() {
            trace!("no enabled sources to poll");
            return Ok(0);
        }

        let polls = enabled.iter().map(|&i| {
            let source = self.sources[i].source.clone();
            async move { source.poll().await }
        });
        let results = futures::future::join_all(polls).await;

        let counters = &self.context.counters;
        let mut enqueued = 0;
        let mut failures = 0;

        for (i, result) in enabled.iter().copied().zip(results) {
            let name = self.sources[i].source.name().to_string();

            let samples = match result {
                Ok(samples) => {
                    counters.polls.incr();
                    samples
                }
                Err(e) => {
                    counters.poll_errors.incr();
                    failures += 1;
                    if e.is_permanent() {
                        error!("disabling source {name}: {e}");
                        self.sources[i].enabled = false;
                    } else {
                        warn!("source {name}: {e}");
                    }
                    continue;
                }
            };

            if samples.is_empty() {
                trace!("source {name} returned no samples");
                continue;
            }

            let count = samples.len();
            match self.context.queue.push(samples).await {
                PushOutcome::Accepted => {
                    counters.samples_enqueued.add(count as u64);
                    enqueued += count;
                }
                PushOutcome::DroppedOldest(evicted) => {
                    counters.samples_enqueued.add(count as u64);
                    counters.queue_dropped_batches.incr();
                    counters.queue_dropped_samples.add(evicted as u64);
                    warn!("queue full, dropped oldest chunk of {evicted} samples");
                    enqueued += count;
                }
                PushOutcome::Closed => {
                    warn!("queue closed, discarding {count} samples from {name}");
                }
            }
        }

        if failures == enabled.len() {
            anyhow::bail!("all {failures} polled source(s) failed");
        }

        trace!("poll cycle enqueued {enqueued} samples");
        Ok(enqueued)
    }
}

/// Handle for controlling a SchedulerActor
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Spawn a new scheduler actor
    pub fn spawn(
        sources: Vec<Arc<dyn MetricSource>>,
        period: Option<Duration>,
        context: PipelineContext,
        stop_request: Arc<watch::Sender<bool>>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SchedulerActor::new(sources, period, context, cmd_rx, stop_request);
        let task = tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            task,
        }
    }

    /// Poll all sources now and return the number of samples enqueued
    pub async fn poll_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn update_period(&self, period: Duration) -> Result<()> {
        self.sender
            .send(SchedulerCommand::UpdatePeriod { period })
            .await
            .context("failed to send UpdatePeriod command")?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the actor task to end
    pub async fn wait(&mut self) -> Result<()> {
        (&mut self.task)
            .await
            .context("scheduler task failed")
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}
