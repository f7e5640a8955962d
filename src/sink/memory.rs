use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::Sink;
use crate::error::SinkError;
use crate::measurement::{Batch, Measurement};

/// Keeps every delivered batch in memory.
///
/// Used by tests and by `sink.kind = "memory"` for local inspection. Can be
/// switched into a failing mode to exercise the drop path.
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Batch>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every write fails.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().clone()
    }

    /// All delivered measurements, flattened in delivery order.
    pub fn measurements(&self) -> Vec<Measurement> {
        self.batches
            .lock()
            .iter()
            .flat_map(|b| b.measurements.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, batch: &Batch) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Backend("memory sink set to fail".into()));
        }
        self.batches.lock().push(batch.clone());
        Ok(())
    }
}
