//! Message types for actor communication
//!
//! Both actors take commands over an mpsc channel. Request/response commands
//! carry a oneshot sender for the reply. Samples themselves never travel over
//! these channels; they go through the [`SampleQueue`](crate::queue::SampleQueue).

use std::time::Duration;

use tokio::sync::oneshot;

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Poll every enabled source right now, outside the tick schedule
    ///
    /// Responds with the number of samples enqueued.
    PollNow {
        respond_to: oneshot::Sender<anyhow::Result<usize>>,
    },

    /// Change the polling period
    ///
    /// The ticker restarts with the new period right away.
    UpdatePeriod { period: Duration },
}

/// Commands that can be sent to the ShipperActor
#[derive(Debug)]
pub enum ShipperCommand {
    /// Flush the current batch regardless of its size or age
    ///
    /// Responds with whether the batch was delivered (an empty batch counts
    /// as delivered).
    Flush { respond_to: oneshot::Sender<bool> },

    /// Number of samples waiting in the current batch
    Pending { respond_to: oneshot::Sender<usize> },
}

/// What the shipper hands back once the queue is closed and drained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Samples delivered to the sink while draining
    pub samples_flushed: u64,

    /// Samples spilled while draining (kept, but not delivered)
    pub samples_spilled: u64,

    /// Samples dropped while draining
    pub samples_lost: u64,
}
