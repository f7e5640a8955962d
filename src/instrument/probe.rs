use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::ProbeKey;
use crate::context::ExecutionContext;
use crate::measurement::{names, tags, Tags};
use crate::metrics::CallStats;

/// Times and counts invocations of one registered operation.
pub struct MethodProbe {
    key: ProbeKey,
    tag: String,
    stats: Option<Arc<CallStats>>,
    threshold: Duration,
}

impl MethodProbe {
    pub(crate) fn new(key: ProbeKey, tag: &str, stats: Arc<CallStats>, threshold: Duration) -> Self {
        Self {
            key,
            tag: tag.to_string(),
            stats: Some(stats),
            threshold,
        }
    }

    /// Records nothing; handed out for unregistered operations.
    pub(crate) fn passthrough(key: ProbeKey) -> Self {
        let tag = key.to_string();
        Self {
            key,
            tag,
            stats: None,
            threshold: Duration::ZERO,
        }
    }

    pub fn key(&self) -> &ProbeKey {
        &self.key
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_passthrough(&self) -> bool {
        self.stats.is_none()
    }

    /// Run `f`, record the call, return `f`'s result untouched.
    ///
    /// A panic inside `f` is still recorded, as a failed call.
    pub fn call<R, E>(&self, ctx: &ExecutionContext, f: impl FnOnce() -> Result<R, E>) -> Result<R, E> {
        let mut guard = CallGuard::start(self, ctx);
        let result = f();
        guard.complete(result.is_err());
        result
    }

    /// Async form of [`call`](Self::call). Dropping the future after its
    /// first poll records a failed call.
    pub async fn call_async<R, E, Fut>(&self, ctx: &ExecutionContext, fut: Fut) -> Result<R, E>
    where
        Fut: Future<Output = Result<R, E>>,
    {
        let mut guard = CallGuard::start(self, ctx);
        let result = fut.await;
        guard.complete(result.is_err());
        result
    }

    fn observe(&self, ctx: &ExecutionContext, elapsed: Duration, failed: bool) {
        let Some(stats) = &self.stats else {
            return;
        };
        stats.record(&self.tag, elapsed, !failed);

        let mut method_tags = Tags::new();
        method_tags.insert(tags::METHOD.into(), self.tag.clone());

        ctx.increment_tagged(names::METHOD_CALL_COUNT, 1.0, method_tags.clone());
        if failed {
            ctx.increment_tagged(names::METHOD_CALL_ERRORS, 1.0, method_tags.clone());
        }

        if elapsed >= self.threshold {
            method_tags.insert(tags::ERROR.into(), failed.to_string());
            ctx.record_duration(names::METHOD_CALL_DURATION, elapsed.as_secs_f64(), method_tags);
        }
    }
}

/// Records exactly once, on drop. A call that never reported its outcome
/// (panic, cancelled future) counts as failed.
struct CallGuard<'a> {
    probe: &'a MethodProbe,
    ctx: &'a ExecutionContext,
    start: Instant,
    failed: Option<bool>,
}

impl<'a> CallGuard<'a> {
    fn start(probe: &'a MethodProbe, ctx: &'a ExecutionContext) -> Self {
        Self {
            probe,
            ctx,
            start: Instant::now(),
            failed: None,
        }
    }

    fn complete(&mut self, failed: bool) {
        self.failed = Some(failed);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        let failed = self.failed.unwrap_or(true);
        self.probe.observe(self.ctx, self.start.elapsed(), failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;

    fn probe(threshold: Duration) -> MethodProbe {
        MethodProbe::new(
            ProbeKey::new("Db", "fetch"),
            "db.fetch",
            Arc::new(CallStats::new()),
            threshold,
        )
    }

    fn method_tags() -> Tags {
        [(tags::METHOD.to_string(), "db.fetch".to_string())].into_iter().collect()
    }

    #[test]
    fn test_every_call_is_counted_and_timed() {
        let probe = probe(Duration::ZERO);
        let ctx = ExecutionContext::new(Dispatcher::disabled());
        ctx.begin().unwrap();

        for i in 0..5u32 {
            let r: Result<u32, String> = probe.call(&ctx, || {
                if i % 2 == 0 {
                    Ok(i)
                } else {
                    Err(format!("row {i} missing"))
                }
            });
            assert_eq!(r.is_ok(), i % 2 == 0);
        }

        ctx.with_transaction(|tx| {
            assert_eq!(tx.counter(names::METHOD_CALL_COUNT, &method_tags()), Some(5.0));
            assert_eq!(tx.counter(names::METHOD_CALL_ERRORS, &method_tags()), Some(2.0));
            assert_eq!(tx.durations().len(), 5);
            let errored = tx
                .durations()
                .iter()
                .filter(|m| m.tag(tags::ERROR) == Some("true"))
                .count();
            assert_eq!(errored, 2);
        })
        .unwrap();
    }

    #[test]
    fn test_error_is_returned_unchanged() {
        #[derive(Debug, PartialEq)]
        struct NotFound(u64);

        let probe = probe(Duration::ZERO);
        let ctx = ExecutionContext::new(Dispatcher::disabled());
        let r: Result<(), NotFound> = probe.call(&ctx, || Err(NotFound(42)));
        assert_eq!(r, Err(NotFound(42)));
    }

    #[test]
    fn test_threshold_skips_fast_durations_but_counts() {
        let probe = probe(Duration::from_secs(60));
        let ctx = ExecutionContext::new(Dispatcher::disabled());
        ctx.begin().unwrap();

        let _: Result<(), ()> = probe.call(&ctx, || Ok(()));

        ctx.with_transaction(|tx| {
            assert_eq!(tx.counter(names::METHOD_CALL_COUNT, &method_tags()), Some(1.0));
            assert!(tx.durations().is_empty());
        })
        .unwrap();
    }

    #[tokio::test]
    async fn test_call_async_records() {
        let probe = probe(Duration::ZERO);
        let ctx = ExecutionContext::new(Dispatcher::disabled());
        ctx.begin().unwrap();

        let r: Result<&str, ()> = probe
            .call_async(&ctx, async {
                tokio::task::yield_now().await;
                Ok("done")
            })
            .await;
        assert_eq!(r, Ok("done"));

        let durations = ctx.with_transaction(|tx| tx.durations().len()).unwrap();
        assert_eq!(durations, 1);
    }

    #[test]
    fn test_panicking_call_is_recorded_as_failure() {
        let probe = probe(Duration::ZERO);
        let ctx = ExecutionContext::new(Dispatcher::disabled());
        ctx.begin().unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), ()> = probe.call(&ctx, || panic!("driver crashed"));
        }));
        assert!(outcome.is_err());

        ctx.with_transaction(|tx| {
            assert_eq!(tx.counter(names::METHOD_CALL_COUNT, &method_tags()), Some(1.0));
            assert_eq!(tx.counter(names::METHOD_CALL_ERRORS, &method_tags()), Some(1.0));
            assert_eq!(tx.durations().len(), 1);
            assert_eq!(tx.durations()[0].tag(tags::ERROR), Some("true"));
        })
        .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_call_async_is_recorded_as_failure() {
        let probe = probe(Duration::ZERO);
        let ctx = ExecutionContext::new(Dispatcher::disabled());
        ctx.begin().unwrap();

        let slow = probe.call_async(&ctx, std::future::pending::<Result<(), ()>>());
        assert!(tokio::time::timeout(Duration::from_millis(5), slow)
            .await
            .is_err());

        ctx.with_transaction(|tx| {
            assert_eq!(tx.counter(names::METHOD_CALL_ERRORS, &method_tags()), Some(1.0));
            assert_eq!(tx.durations().len(), 1);
            assert_eq!(tx.durations()[0].tag(tags::ERROR), Some("true"));
        })
        .unwrap();
    }
}
