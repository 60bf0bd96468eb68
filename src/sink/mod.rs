//! Output sinks for shipped batches
//!
//! ## Design
//!
//! - **Trait-based**: the shipper only knows [`Sink`], so outputs are swappable
//! - **Batch-oriented**: a batch is published as a whole or not at all
//!
//! ## Sinks
//!
//! - [`file::FileSink`]: JSON lines appended to a file
//! - [`console::ConsoleSink`]: JSON lines on stdout
//! - [`memory::MemorySink`]: kept in process, for embedding and tests

pub mod console;
pub mod error;
pub mod file;
pub mod memory;

use async_trait::async_trait;

pub use error::{SinkError, SinkResult};

use crate::batch::Batch;

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare the sink before the beat reports readiness.
    ///
    /// A failure here aborts startup.
    async fn open(&self) -> SinkResult<()> {
        Ok(())
    }

    /// Deliver every sample of `batch`.
    ///
    /// On error the shipper assumes nothing was delivered and retries the
    /// whole batch, so delivery is at-least-once.
    async fn publish(&self, batch: &Batch) -> SinkResult<()>;

    async fn close(&self) -> SinkResult<()> {
        Ok(())
    }
}

/// Encode a batch as newline-delimited JSON
pub fn encode_json_lines(batch: &Batch) -> SinkResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(batch.len() * 128);
    for sample in batch.samples() {
        serde_json::to_writer(&mut buf, sample)?;
        buf.push(b'\n');
    }
    Ok(buf)
}
