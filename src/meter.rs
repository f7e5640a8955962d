use std::sync::Arc;
use std::time::Duration;

use crate::config::MetricsConfig;
use crate::context::ExecutionContext;
use crate::dispatch::{DispatchOptions, Dispatcher};
use crate::error::SinkError;
use crate::instrument::Instrumentation;
use crate::metrics::{CallStats, MetricsReport};
use crate::sampler::{ConnectionGauges, Sampler};
use crate::sink::{self, Sink};

/// The process-wide instrumentation facility.
///
/// One per process. Hands out [`ExecutionContext`]s, owns the probe
/// registry, the dispatcher and the connection gauges the sampler reads.
pub struct Meter {
    instrumentation: Arc<Instrumentation>,
    dispatcher: Dispatcher,
    gauges: ConnectionGauges,
}

impl Meter {
    pub fn with_sink(sink: Arc<dyn Sink>, options: DispatchOptions, threshold: Duration) -> Self {
        Self::assemble(Dispatcher::start(sink, options), threshold)
    }

    /// Probes and contexts still work, nothing is delivered.
    pub fn disabled() -> Self {
        Self::assemble(Dispatcher::disabled(), Duration::ZERO)
    }

    /// Build the configured sink and start delivering.
    pub async fn from_config(config: &MetricsConfig) -> Result<Self, SinkError> {
        if !config.enabled {
            tracing::info!("metrics disabled");
            return Ok(Self::disabled());
        }
        let sink = sink::from_config(&config.sink).await?;
        Ok(Self::with_sink(
            sink,
            DispatchOptions::from(config),
            config.method_call_threshold(),
        ))
    }

    fn assemble(dispatcher: Dispatcher, threshold: Duration) -> Self {
        Self {
            instrumentation: Arc::new(Instrumentation::new(Arc::new(CallStats::new()), threshold)),
            dispatcher,
            gauges: ConnectionGauges::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dispatcher.is_enabled()
    }

    /// Fresh context for one request or job.
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::new(self.dispatcher.clone())
    }

    pub fn instrumentation(&self) -> &Arc<Instrumentation> {
        &self.instrumentation
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn gauges(&self) -> &ConnectionGauges {
        &self.gauges
    }

    /// Sampler wired to this meter with the default sources.
    pub fn sampler(&self, interval: Duration) -> Sampler {
        Sampler::new(interval, self.dispatcher.clone()).with_default_sources(self.gauges.clone())
    }

    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            enabled: self.is_enabled(),
            calls: self.instrumentation.stats().snapshot(),
            dispatch: self.dispatcher.stats(),
            instrumented_operations: self.instrumentation.len(),
            untracked_pending: self.dispatcher.untracked_len(),
        }
    }

    /// Flush and stop delivery. Stop the sampler first.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

impl From<&MetricsConfig> for DispatchOptions {
    fn from(config: &MetricsConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            max_batch_size: config.max_batch_size,
            timeout: config.sink.timeout(),
            max_retries: config.sink.max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    #[tokio::test]
    async fn test_disabled_config_yields_disabled_meter() {
        let meter = Meter::from_config(&MetricsConfig::default()).await.unwrap();
        assert!(!meter.is_enabled());
        assert!(!meter.report().enabled);
    }

    #[tokio::test]
    async fn test_memory_sink_from_config() {
        let config = MetricsConfig::from_toml("enabled = true\n[sink]\nkind = \"memory\"").unwrap();
        let meter = Meter::from_config(&config).await.unwrap();
        assert!(meter.is_enabled());
        meter.shutdown().await;
    }

    #[test]
    fn test_dispatch_options_from_config() {
        let config = MetricsConfig::from_toml("queue_capacity = 7\nmax_batch_size = 3").unwrap();
        let options = DispatchOptions::from(&config);
        assert_eq!(options.queue_capacity, 7);
        assert_eq!(options.max_batch_size, 3);
        assert_eq!(options.timeout, Some(Duration::from_millis(1_000)));
    }

    #[tokio::test]
    async fn test_sampler_uses_default_sources() {
        let meter = Meter::with_sink(
            Arc::new(MemorySink::new()),
            DispatchOptions::default(),
            Duration::ZERO,
        );
        assert_eq!(meter.sampler(Duration::from_secs(1)).source_count(), 4);
        meter.shutdown().await;
    }
}
