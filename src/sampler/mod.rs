//! Periodic process sampler.
//!
//! # Data Flow
//! ```text
//! interval tick ──► every GaugeSource::collect()
//!                     ├─ Ok(ms)   → tagged scope=process, transaction=none
//!                     └─ Err/panic → warn!, skipped for this tick only
//!               ──► Dispatcher::submit_measurements + flush_untracked
//! ```
//!
//! Ticks use `MissedTickBehavior::Skip`: a slow tick costs at most the one
//! tick it overlapped, the schedule never drifts.

mod sources;

pub use sources::{
    ConnectionGauge, ConnectionGauges, FileDescriptorSource, MemorySource, RuntimeSource,
};

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::dispatch::Dispatcher;
use crate::error::SamplerError;
use crate::measurement::Measurement;

/// Something the sampler reads once per tick.
pub trait GaugeSource: Send + Sync {
    fn name(&self) -> &str;

    fn collect(&self) -> Result<Vec<Measurement>, SamplerError>;
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub measurements: usize,
    pub failed_sources: usize,
}

pub struct Sampler {
    interval: Duration,
    sources: Vec<Box<dyn GaugeSource>>,
    dispatcher: Dispatcher,
}

impl Sampler {
    pub fn new(interval: Duration, dispatcher: Dispatcher) -> Self {
        Self {
            interval,
            sources: Vec::new(),
            dispatcher,
        }
    }

    pub fn with_source(mut self, source: impl GaugeSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Memory, descriptors, runtime load and the given connection gauges.
    pub fn with_default_sources(self, gauges: ConnectionGauges) -> Self {
        self.with_source(MemorySource)
            .with_source(FileDescriptorSource)
            .with_source(RuntimeSource)
            .with_source(gauges)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Collect from every source once and queue the result.
    pub fn sample_once(&self) -> TickReport {
        let mut measurements = Vec::new();
        let mut failed_sources = 0;

        for source in &self.sources {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| source.collect()))
                .unwrap_or_else(|_| Err(SamplerError::new(source.name(), "source panicked")));

            match outcome {
                Ok(batch) => {
                    measurements.extend(batch.into_iter().map(Measurement::process_level))
                }
                Err(e) => {
                    failed_sources += 1;
                    tracing::warn!(source = source.name(), error = %e, "sampler tick failed");
                }
            }
        }

        let count = measurements.len();
        if count > 0 {
            self.dispatcher.submit_measurements(measurements, "sampler");
        }
        self.dispatcher.flush_untracked();

        TickReport {
            measurements: count,
            failed_sources,
        }
    }

    /// Spawn the sampling loop. The first tick fires immediately; dropping
    /// the returned handle stops the loop as well.
    pub fn start(self) -> SamplerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            sources = self.sources.len(),
            "sampler started"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut ticks = 0u64;

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let report = self.sample_once();
                        ticks += 1;
                        tracing::debug!(
                            tick = ticks,
                            measurements = report.measurements,
                            failed = report.failed_sources,
                            "sampler tick"
                        );
                    }
                }
            }

            tracing::info!(ticks, "sampler stopped");
            ticks
        });

        SamplerHandle { stop_tx, handle }
    }
}

pub struct SamplerHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl SamplerHandle {
    /// Signal the loop and wait for it. Returns the number of ticks run.
    pub async fn stop(self) -> u64 {
        let _ = self.stop_tx.send(true);
        match self.handle.await {
            Ok(ticks) => ticks,
            Err(e) => {
                tracing::warn!(error = %e, "sampler task ended abnormally");
                0
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
