//! Actor-based polling and shipping pipeline
//!
//! Each actor runs as an independent tokio task and is controlled through a
//! handle wrapping its command channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │  Beat (lifecycle)│
//!                 └────────┬─────────┘
//!                          │ spawns
//!           ┌──────────────┴──────────────┐
//!           │                             │
//!   ┌───────▼────────┐            ┌───────▼────────┐
//!   │ SchedulerActor │            │  ShipperActor  │──► Sink
//!   │ (tick + poll)  │            │ (batch, flush) │──► Spill
//!   └───────┬────────┘            └───────▲────────┘
//!           │  push                       │ pop
//!           └────────► SampleQueue ───────┘
//!                      (bounded)
//! ```
//!
//! ## Actor Types
//!
//! - **SchedulerActor**: polls every source once per period, never overlapping
//! - **ShipperActor**: batches samples and delivers them to the sink
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control messages
//! 2. **Data**: samples move through the bounded [`SampleQueue`] only
//! 3. **Stop**: a watch channel carries the cooperative shutdown flag

pub mod messages;
pub mod scheduler;
pub mod shipper;

use std::sync::Arc;

use tokio::sync::watch;

use crate::queue::SampleQueue;
use crate::stats::Counters;

/// State shared by both actors
#[derive(Clone)]
pub struct PipelineContext {
    pub queue: Arc<SampleQueue>,
    pub counters: Arc<Counters>,
    /// Raised once when the beat starts draining
    pub shutdown: watch::Receiver<bool>,
}

/// Resolve once the shutdown flag is raised (or its sender is gone).
pub(crate) async fn shutdown_raised(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
