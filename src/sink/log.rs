use async_trait::async_trait;

use super::Sink;
use crate::error::SinkError;
use crate::measurement::Batch;

/// Writes batches to the tracing output. Default backend when no
/// time-series database is configured.
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn write(&self, batch: &Batch) -> Result<(), SinkError> {
        tracing::info!(
            target: "callmeter::sink",
            batch = %batch.short_id(),
            measurements = batch.len(),
            "metrics batch"
        );
        for m in &batch.measurements {
            tracing::debug!(target: "callmeter::sink", "{}", serde_json::to_string(m)?);
        }
        Ok(())
    }
}
