//! Sink adapters.
//!
//! A [`Sink`] is an append-only destination for [`Batch`]es. The
//! [`SinkAdapter`] in front of it adds the delivery timeout and bounded
//! retry; callers treat every error it returns as log-and-drop.
//!
//! ```text
//! Dispatcher ──► SinkAdapter::deliver ──► dyn Sink
//!                  ├─ timeout per attempt
//!                  └─ retry (Network / Timeout only)
//! ```

mod log;
mod memory;
mod redis_list;
mod udp;

pub use self::log::LogSink;
pub use self::memory::MemorySink;
pub use self::redis_list::RedisSink;
pub use self::udp::{encode_line, UdpSink};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use uuid::Uuid;

use crate::config::{SinkConfig, SinkKind};
use crate::error::SinkError;
use crate::measurement::Batch;

#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Persist one batch. Must not reorder measurements within it.
    async fn write(&self, batch: &Batch) -> Result<(), SinkError>;
}

/// Acknowledgement for a delivered batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub batch_id: Uuid,
    pub measurements: usize,
    pub attempts: u32,
}

pub struct SinkAdapter {
    sink: Arc<dyn Sink>,
    max_retries: u32,
    retry_base: Duration,
}

impl SinkAdapter {
    pub fn new(sink: Arc<dyn Sink>, max_retries: u32) -> Self {
        Self {
            sink,
            max_retries,
            retry_base: Duration::from_millis(50),
        }
    }

    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn name(&self) -> &str {
        self.sink.name()
    }

    /// Deliver `batch`, retrying retryable failures up to `max_retries` times.
    pub async fn deliver(&self, batch: &Batch, timeout: Option<Duration>) -> Result<Ack, SinkError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, self.sink.write(batch)).await {
                    Ok(r) => r,
                    Err(_) => Err(SinkError::Timeout(limit.as_millis() as u64)),
                },
                None => self.sink.write(batch).await,
            };

            match result {
                Ok(()) => {
                    return Ok(Ack {
                        batch_id: batch.id,
                        measurements: batch.len(),
                        attempts: attempt,
                    })
                }
                Err(e) if e.is_retryable() && attempt <= self.max_retries => {
                    let delay = retry_delay(attempt, self.retry_base);
                    tracing::debug!(
                        sink = self.sink.name(),
                        batch = %batch.short_id(),
                        attempt,
                        error = %e,
                        "retrying batch delivery in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exponential backoff with up to 10% jitter.
fn retry_delay(attempt: u32, base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let capped = delay_ms.min(2_000);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };
    Duration::from_millis(capped + jitter)
}

/// Build the configured backend.
pub async fn from_config(config: &SinkConfig) -> Result<Arc<dyn Sink>, SinkError> {
    let sink: Arc<dyn Sink> = match config.kind {
        SinkKind::Log => Arc::new(LogSink::new()),
        SinkKind::Memory => Arc::new(MemorySink::new()),
        SinkKind::Udp => {
            Arc::new(UdpSink::connect(&config.host, config.port, config.packet_size).await?)
        }
        SinkKind::Redis => Arc::new(
            RedisSink::connect(&config.redis_url, &config.redis_key, config.redis_max_len).await?,
        ),
    };
    tracing::info!(sink = sink.name(), "metrics sink ready");
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;
    use parking_lot::Mutex;

    /// Fails with the queued errors first, then succeeds.
    struct Flaky {
        errors: Mutex<Vec<SinkError>>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl Sink for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn write(&self, _batch: &Batch) -> Result<(), SinkError> {
            *self.calls.lock() += 1;
            match self.errors.lock().pop() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    struct Stalled;

    #[async_trait]
    impl Sink for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn write(&self, _batch: &Batch) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn batch() -> Batch {
        Batch::new(vec![Measurement::new("m", 1.0), Measurement::new("m", 2.0)])
    }

    #[tokio::test]
    async fn test_deliver_acknowledges() {
        let sink = Arc::new(MemorySink::new());
        let adapter = SinkAdapter::new(sink.clone(), 0);
        let b = batch();

        let ack = adapter.deliver(&b, None).await.unwrap();
        assert_eq!(ack.batch_id, b.id);
        assert_eq!(ack.measurements, 2);
        assert_eq!(ack.attempts, 1);
        assert_eq!(sink.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_retries_network_errors() {
        let flaky = Arc::new(Flaky {
            errors: Mutex::new(vec![SinkError::Network("reset".into())]),
            calls: Mutex::new(0),
        });
        let adapter = SinkAdapter::new(flaky.clone(), 2).with_retry_base(Duration::from_millis(1));

        let ack = adapter.deliver(&batch(), None).await.unwrap();
        assert_eq!(ack.attempts, 2);
        assert_eq!(*flaky.calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_deliver_gives_up_after_max_retries() {
        let flaky = Arc::new(Flaky {
            errors: Mutex::new(vec![
                SinkError::Network("a".into()),
                SinkError::Network("b".into()),
                SinkError::Network("c".into()),
            ]),
            calls: Mutex::new(0),
        });
        let adapter = SinkAdapter::new(flaky.clone(), 1).with_retry_base(Duration::from_millis(1));

        let err = adapter.deliver(&batch(), None).await.unwrap_err();
        assert!(matches!(err, SinkError::Network(_)));
        assert_eq!(*flaky.calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let flaky = Arc::new(Flaky {
            errors: Mutex::new(vec![SinkError::Backend("WRONGTYPE".into())]),
            calls: Mutex::new(0),
        });
        let adapter = SinkAdapter::new(flaky.clone(), 5);

        assert!(adapter.deliver(&batch(), None).await.is_err());
        assert_eq!(*flaky.calls.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_times_out() {
        let adapter = SinkAdapter::new(Arc::new(Stalled), 0);
        let err = adapter
            .deliver(&batch(), Some(Duration::from_millis(250)))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Timeout(250)));
    }

    #[test]
    fn test_retry_delay_grows() {
        let base = Duration::from_millis(100);
        assert!(retry_delay(1, base) >= Duration::from_millis(100));
        assert!(retry_delay(2, base) >= Duration::from_millis(200));
        assert!(retry_delay(20, base) <= Duration::from_millis(2_200));
    }
}
