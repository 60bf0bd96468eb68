//! ShipperActor - Batches samples and delivers them to the sink
//!
//! ## Batching Strategy
//!
//! Samples popped from the queue are appended to the current batch, which is
//! flushed on whichever trigger fires first:
//!
//! - **Size trigger**: the batch holds `batch_size` samples
//! - **Age trigger**: `max_batch_age` has passed since its first sample
//!
//! ## Failure Handling
//!
//! A failed publish is retried up to `max_retries` times with exponential
//! backoff. After that the batch is spilled or dropped according to the
//! failure policy, and counted either way. A batch is never split: the sink
//! gets all of it or it is handled as a whole.
//!
//! ## Draining
//!
//! Once the queue is closed the actor pops what is left, flushes the final
//! batch and returns a [`DrainReport`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::MetricSample;
use crate::backoff::Backoff;
use crate::batch::Batch;
use crate::config::{FailurePolicy, ShipperSettings};
use crate::sink::Sink;
use crate::spill::Spill;

use super::PipelineContext;
use super::messages::{DrainReport, ShipperCommand};

pub struct ShipperActor {
    sink: Arc<dyn Sink>,

    /// Spill area, required for the `spill` failure policy
    spill: Option<Arc<dyn Spill>>,

    settings: ShipperSettings,

    context: PipelineContext,

    command_rx: mpsc::Receiver<ShipperCommand>,

    /// Samples waiting for the next flush
    batch: Batch,

    /// Set once the queue reports closed and empty
    draining: bool,

    report: DrainReport,
}

impl ShipperActor {
    pub fn new(
        sink: Arc<dyn Sink>,
        spill: Option<Arc<dyn Spill>>,
        settings: ShipperSettings,
        context: PipelineContext,
        command_rx: mpsc::Receiver<ShipperCommand>,
    ) -> Self {
        if settings.on_failure == FailurePolicy::Spill && spill.is_none() {
            warn!("failure policy is spill but no spill area is configured, dropping instead");
        }

        Self {
            sink,
            spill,
            batch: Batch::with_capacity(settings.batch_size),
            settings,
            context,
            command_rx,
            draining: false,
            report: DrainReport::default(),
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until the queue is closed and empty, then performs the final
    /// flush and returns what happened while draining.
    #[instrument(skip(self), fields(sink = %self.sink.name()))]
    pub async fn run(mut self) -> DrainReport {
        debug!(
            "starting shipper actor (batch size {}, max age {:?})",
            self.settings.batch_size, self.settings.max_batch_age
        );

        self.replay_spilled().await;

        loop {
            if !self.draining && *self.context.shutdown.borrow() {
                debug!("shutdown raised, draining");
                self.draining = true;
            }

            let deadline = self.batch.deadline(self.settings.max_batch_age);

            tokio::select! {
                chunk = self.context.queue.pop() => {
                    match chunk {
                        Some(samples) => self.accept(samples).await,
                        None => {
                            debug!("queue closed and empty");
                            break;
                        }
                    }
                }

                // Time-based flush trigger
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    trace!("age-based flush triggered ({} samples)", self.batch.len());
                    self.flush().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd).await;
                }
            }
        }

        self.draining = true;
        if !self.batch.is_empty() {
            debug!("final flush before shutdown ({} samples)", self.batch.len());
            self.flush().await;
        }

        debug!("shipper actor stopped");
        self.report
    }

    async fn handle_command(&mut self, cmd: ShipperCommand) {
        match cmd {
            ShipperCommand::Flush { respond_to } => {
                debug!("received Flush command");
                let delivered = self.flush().await;
                let _ = respond_to.send(delivered);
            }
            ShipperCommand::Pending { respond_to } => {
                let _ = respond_to.send(self.batch.len());
            }
        }
    }

    async fn accept(&mut self, samples: Vec<MetricSample>) {
        for sample in samples {
            self.batch.push(sample);

            // Size-based flush trigger
            if self.batch.is_full(self.settings.batch_size) {
                trace!("size-based flush triggered ({} samples)", self.batch.len());
                self.flush().await;
            }
        }
    }

    /// Flush the current batch. Returns whether it reached the sink.
    async fn flush(&mut self) -> bool {
        if self.batch.is_empty() {
            return true;
        }

        let batch = std::mem::replace(
            &mut self.batch,
            Batch::with_capacity(self.settings.batch_size),
        );
        self.deliver(batch).await
    }

    /// Losses and deliveries from now on belong in the drain report.
    ///
    /// The shutdown flag is read on every call, since it can be raised while a
    /// batch sits in its retry backoff.
    fn is_draining(&self) -> bool {
        self.draining || *self.context.shutdown.borrow()
    }

    async fn deliver(&mut self, batch: Batch) -> bool {
        if self.publish_with_retry(&batch).await {
            return true;
        }
        self.give_up(batch).await;
        false
    }

    /// Publish a batch, retrying with backoff. Returns whether it reached the sink.
    async fn publish_with_retry(&mut self, batch: &Batch) -> bool {
        let counters = self.context.counters.clone();
        let size = batch.len() as u64;
        let mut backoff =
            Backoff::new(self.settings.retry_backoff, self.settings.retry_backoff_max);
        let mut attempt = 0;

        loop {
            match self.sink.publish(batch).await {
                Ok(()) => {
                    counters.flushes.incr();
                    counters.samples_shipped.add(size);
                    if self.is_draining() {
                        self.report.samples_flushed += size;
                    }
                    trace!("flush #{} complete ({size} samples)", counters.flushes.get());
                    return true;
                }
                Err(e) if attempt < self.settings.max_retries => {
                    attempt += 1;
                    counters.flush_retries.incr();
                    let delay = backoff.next_delay();
                    warn!(
                        "failed to flush {size} samples (attempt {attempt}/{}): {e}",
                        self.settings.max_retries
                    );
                    debug!("retrying in {delay:?}");
                    time::sleep(delay).await;
                }
                Err(e) => {
                    error!("giving up on batch of {size} samples after {attempt} retries: {e}");
                    return false;
                }
            }
        }
    }

    async fn give_up(&mut self, batch: Batch) {
        let counters = self.context.counters.clone();
        let size = batch.len() as u64;

        if self.settings.on_failure == FailurePolicy::Spill
            && let Some(spill) = &self.spill
        {
            match spill.store(&batch).await {
                Ok(()) => {
                    counters.batches_spilled.incr();
                    counters.samples_spilled.add(size);
                    if self.is_draining() {
                        self.report.samples_spilled += size;
                    }
                    warn!("spilled batch of {size} samples for a later retry");
                    return;
                }
                Err(e) => error!("failed to spill batch: {e}"),
            }
        }

        counters.batches_dropped.incr();
        counters.samples_dropped.add(size);
        if self.is_draining() {
            self.report.samples_lost += size;
        }
        error!("dropped batch of {size} samples");
    }

    /// Retry batches spilled by an earlier run before shipping anything new.
    ///
    /// A spill file is removed only after its batch was published. If the sink
    /// is still failing, the remaining files stay for the next start.
    async fn replay_spilled(&mut self) {
        let Some(spill) = self.spill.clone() else {
            return;
        };

        let pending = match spill.pending().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("could not read spilled batches: {e}");
                return;
            }
        };

        if pending.is_empty() {
            return;
        }

        info!("replaying {} spilled batch(es)", pending.len());
        for (replayed, spilled) in pending.iter().enumerate() {
            if !self.publish_with_retry(&spilled.batch).await {
                warn!(
                    "sink still failing, keeping {} spilled batch(es) for the next start",
                    pending.len() - replayed
                );
                return;
            }
            if let Err(e) = spill.remove(spilled).await {
                warn!("replayed batch may be delivered again: {e}");
            }
        }
    }
}

/// Handle for controlling a ShipperActor
pub struct ShipperHandle {
    sender: mpsc::Sender<ShipperCommand>,
    task: JoinHandle<DrainReport>,
}

impl ShipperHandle {
    /// Spawn a new shipper actor
    pub fn spawn(
        sink: Arc<dyn Sink>,
        spill: Option<Arc<dyn Spill>>,
        settings: ShipperSettings,
        context: PipelineContext,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = ShipperActor::new(sink, spill, settings, context, cmd_rx);
        let task = tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            task,
        }
    }

    /// Flush the current batch now; returns whether it was delivered
    pub async fn flush(&self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ShipperCommand::Flush { respond_to: tx })
            .await
            .context("failed to send Flush command")?;

        rx.await.context("failed to receive response")
    }

    /// Samples buffered in the current batch
    pub async fn pending(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ShipperCommand::Pending { respond_to: tx })
            .await
            .context("failed to send Pending command")?;

        rx.await.context("failed to receive response")
    }

    /// Wait for the actor to finish draining
    pub async fn wait(&mut self) -> Result<DrainReport> {
        (&mut self.task).await.context("shipper task failed")
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}
