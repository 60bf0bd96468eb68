//! Local spill area for batches the sink refused
//!
//! When the shipper gives up on a batch and the failure policy is `spill`,
//! the batch is written to its own JSON-lines file. The next shipper to start
//! picks those files up again and retries them before anything new. A file is
//! only removed once its batch reached the sink.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tracing::{debug, warn};

use crate::MetricSample;
use crate::batch::Batch;
use crate::sink::{SinkError, SinkResult, encode_json_lines};

const SPILL_EXTENSION: &str = "jsonl";

#[async_trait]
pub trait Spill: Send + Sync {
    /// Make sure the spill area is usable. Called before readiness.
    async fn prepare(&self) -> SinkResult<()>;

    async fn store(&self, batch: &Batch) -> SinkResult<()>;

    /// Every spilled batch, oldest first. Nothing is removed.
    async fn pending(&self) -> SinkResult<Vec<SpilledBatch>>;

    /// Forget a batch returned by [`Spill::pending`] once it was delivered.
    async fn remove(&self, spilled: &SpilledBatch) -> SinkResult<()>;
}

/// A batch read back from the spill area, with the file it came from
#[derive(Debug, Clone)]
pub struct SpilledBatch {
    pub path: PathBuf,
    pub batch: Batch,
}

pub struct DirectorySpill {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl DirectorySpill {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    fn next_path(&self) -> PathBuf {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        // Zero padded so lexical order is chronological
        self.dir.join(format!(
            "batch-{:020}-{:06}.{SPILL_EXTENSION}",
            Utc::now().timestamp_micros(),
            seq
        ))
    }
}

#[async_trait]
impl Spill for DirectorySpill {
    async fn prepare(&self) -> SinkResult<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn store(&self, batch: &Batch) -> SinkResult<()> {
        let buf = encode_json_lines(batch)?;
        let path = self.next_path();

        // Write then rename so a crash never leaves a truncated batch behind
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &buf).await?;
        fs::rename(&tmp, &path).await?;

        debug!("spilled {} samples to {}", batch.len(), path.display());
        Ok(())
    }

    async fn pending(&self) -> SinkResult<Vec<SpilledBatch>> {
        let mut paths = vec![];
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == SPILL_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut pending = Vec::with_capacity(paths.len());
        for path in paths {
            let content = fs::read_to_string(&path).await?;
            let samples = content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| serde_json::from_str::<MetricSample>(line))
                .collect::<Result<Vec<_>, _>>();

            match samples {
                Ok(samples) => pending.push(SpilledBatch {
                    path,
                    batch: Batch::from_samples(samples),
                }),
                Err(e) => {
                    warn!("discarding unreadable spill file {}: {e}", path.display());
                    remove_file(&path).await?;
                }
            }
        }

        Ok(pending)
    }

    async fn remove(&self, spilled: &SpilledBatch) -> SinkResult<()> {
        remove_file(&spilled.path).await?;
        debug!("removed replayed spill file {}", spilled.path.display());
        Ok(())
    }
}

async fn remove_file(path: &std::path::Path) -> SinkResult<()> {
    fs::remove_file(path)
        .await
        .map_err(|e| SinkError::Unavailable(format!("cannot remove {}: {e}", path.display())))
}
