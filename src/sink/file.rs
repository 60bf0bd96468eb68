//! JSON-lines file output

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::batch::Batch;

use super::{Sink, SinkResult, encode_json_lines};

/// Appends one JSON object per sample to a file.
///
/// The whole batch is encoded up front and written with a single
/// `write_all`, so an encoding error never leaves half a batch on disk.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn open(&self) -> SinkResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        // Fail at startup rather than on the first flush.
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        debug!("writing samples to {}", self.path.display());
        Ok(())
    }

    async fn publish(&self, batch: &Batch) -> SinkResult<()> {
        let buf = encode_json_lines(batch)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;

        trace!("appended {} samples to {}", batch.len(), self.path.display());
        Ok(())
    }
}
