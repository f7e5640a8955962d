//! Non-blocking hand-off between producers and the sink.
//!
//! Producers (`Transaction::finish`, the sampler, untracked recording) call
//! [`Dispatcher::submit`], which only ever does a `try_send` into a bounded
//! queue. A single consumer task owns the [`SinkAdapter`] and delivers
//! batches in FIFO order. Under overload the newest batch is dropped and
//! counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SinkError;
use crate::measurement::{Batch, Measurement};
use crate::sink::{Sink, SinkAdapter};

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub queue_capacity: usize,
    pub max_batch_size: usize,
    pub timeout: Option<Duration>,
    pub max_retries: u32,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_batch_size: 500,
            timeout: Some(Duration::from_secs(1)),
            max_retries: 2,
        }
    }
}

/// Counters exposed on the metrics endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchStats {
    pub batches_submitted: u64,
    pub batches_delivered: u64,
    pub batches_failed: u64,
    pub batches_dropped: u64,
    pub measurements_delivered: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    measurements: AtomicU64,
}

struct Inner {
    tx: Mutex<Option<mpsc::Sender<Batch>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    untracked: Mutex<Vec<Measurement>>,
    max_batch_size: usize,
    enabled: bool,
    counters: Arc<Counters>,
}

/// Cheap to clone; all clones feed the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Spawn the consumer task. Must be called inside a Tokio runtime.
    pub fn start(sink: Arc<dyn Sink>, options: DispatchOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let inner = Arc::new(Inner {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(None),
            untracked: Mutex::new(Vec::new()),
            max_batch_size: options.max_batch_size.max(1),
            enabled: true,
            counters: Arc::default(),
        });

        let adapter = SinkAdapter::new(sink, options.max_retries);
        let handle = tokio::spawn(deliver_loop(
            rx,
            adapter,
            options.timeout,
            inner.counters.clone(),
        ));
        *inner.worker.lock() = Some(handle);

        Self { inner }
    }

    /// A dispatcher that silently discards everything.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(None),
                worker: Mutex::new(None),
                untracked: Mutex::new(Vec::new()),
                max_batch_size: 1,
                enabled: false,
                counters: Arc::default(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size
    }

    /// Queue one batch without waiting.
    pub fn submit(&self, batch: Batch) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }
        let tx = self.inner.tx.lock().clone();
        let Some(tx) = tx else {
            return if self.inner.enabled { Err(SinkError::Closed) } else { Ok(()) };
        };

        let size = batch.len();
        match tx.try_send(batch) {
            Ok(()) => {
                self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SinkError::QueueFull(size))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    /// Chunk and queue measurements, logging instead of failing.
    pub fn submit_measurements(&self, measurements: Vec<Measurement>, origin: &str) -> usize {
        let batches = Batch::chunked(measurements, self.inner.max_batch_size);
        let count = batches.len();
        for batch in batches {
            let id = batch.short_id();
            if let Err(e) = self.submit(batch) {
                tracing::warn!(origin, batch = %id, error = %e, "dropping metrics batch");
            }
        }
        count
    }

    /// Buffer a measurement produced outside any transaction.
    pub fn record_untracked(&self, measurement: Measurement) {
        if !self.inner.enabled {
            return;
        }
        let full = {
            let mut buf = self.inner.untracked.lock();
            buf.push(measurement.untracked());
            if buf.len() >= self.inner.max_batch_size {
                Some(std::mem::take(&mut *buf))
            } else {
                None
            }
        };
        if let Some(measurements) = full {
            self.submit_measurements(measurements, "untracked");
        }
    }

    /// Queue whatever is in the untracked buffer.
    pub fn flush_untracked(&self) {
        let pending = std::mem::take(&mut *self.inner.untracked.lock());
        if !pending.is_empty() {
            self.submit_measurements(pending, "untracked");
        }
    }

    pub fn untracked_len(&self) -> usize {
        self.inner.untracked.lock().len()
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.inner.counters;
        DispatchStats {
            batches_submitted: c.submitted.load(Ordering::Relaxed),
            batches_delivered: c.delivered.load(Ordering::Relaxed),
            batches_failed: c.failed.load(Ordering::Relaxed),
            batches_dropped: c.dropped.load(Ordering::Relaxed),
            measurements_delivered: c.measurements.load(Ordering::Relaxed),
        }
    }

    /// Flush the untracked buffer, close the queue and wait for the
    /// consumer to drain it. Later submits return [`SinkError::Closed`].
    pub async fn shutdown(&self) {
        self.flush_untracked();
        drop(self.inner.tx.lock().take());

        let worker = self.inner.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "metrics dispatcher task ended abnormally");
            }
        }
    }
}

async fn deliver_loop(
    mut rx: mpsc::Receiver<Batch>,
    adapter: SinkAdapter,
    timeout: Option<Duration>,
    counters: Arc<Counters>,
) {
    while let Some(batch) = rx.recv().await {
        match adapter.deliver(&batch, timeout).await {
            Ok(ack) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                counters
                    .measurements
                    .fetch_add(ack.measurements as u64, Ordering::Relaxed);
                tracing::debug!(
                    sink = adapter.name(),
                    batch = %batch.short_id(),
                    measurements = ack.measurements,
                    attempts = ack.attempts,
                    "metrics batch delivered"
                );
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    sink = adapter.name(),
                    batch = %batch.short_id(),
                    measurements = batch.len(),
                    error = %e,
                    "metrics batch dropped"
                );
            }
        }
    }
    tracing::debug!(sink = adapter.name(), "metrics dispatcher drained");
}
