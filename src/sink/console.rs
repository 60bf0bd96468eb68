use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::batch::Batch;

use super::{Sink, SinkResult, encode_json_lines};

/// Writes samples as JSON lines to stdout. Logs go to stderr, so the two
/// streams never interleave.
#[derive(Debug, Default)]
pub struct ConsoleSink;

#[async_trait]
impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn publish(&self, batch: &Batch) -> SinkResult<()> {
        let buf = encode_json_lines(batch)?;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(&buf).await?;
        stdout.flush().await?;
        Ok(())
    }
}
