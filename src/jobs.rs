//! Background job instrumentation.
//!
//! Each job runs in its own [`ExecutionContext`] with a transaction named
//! `job:<name>`, the queue-side counterpart of the HTTP transaction
//! middleware.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::context::ExecutionContext;
use crate::meter::Meter;

pub const JOB_STATUS_TAG: &str = "job_status";
pub const QUEUE_DURATION: &str = "job_queue_duration";

#[derive(Clone)]
pub struct JobRunner {
    meter: Arc<Meter>,
}

impl JobRunner {
    pub fn new(meter: Arc<Meter>) -> Self {
        Self { meter }
    }

    pub async fn run<F, Fut, T, E>(&self, name: &str, job: F) -> Result<T, E>
    where
        F: FnOnce(Arc<ExecutionContext>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_enqueued(name, None, job).await
    }

    /// Like [`run`](Self::run), also recording how long the job waited
    /// since `enqueued_at`.
    pub async fn run_enqueued<F, Fut, T, E>(
        &self,
        name: &str,
        enqueued_at: Option<DateTime<Utc>>,
        job: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Arc<ExecutionContext>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ctx = Arc::new(self.meter.context());
        if let Err(e) = ctx.begin_with_action(format!("job:{name}")) {
            tracing::warn!(job = name, error = %e, "job transaction not started");
        }
        if let Some(at) = enqueued_at {
            let waited_ms = (Utc::now() - at).num_milliseconds().max(0);
            ctx.set(QUEUE_DURATION, waited_ms as f64 / 1000.0);
        }

        let result = job(ctx.clone()).await;

        ctx.add_tag(
            JOB_STATUS_TAG,
            if result.is_ok() { "succeeded" } else { "failed" },
        );
        ctx.finish();
        result
    }
}
