//! Execution contexts.
//!
//! An [`ExecutionContext`] is created per unit of work (request, job) and
//! passed explicitly to every instrumented call. It holds at most one
//! current [`Transaction`]. Contexts are never shared between units of
//! work, so the interior lock is uncontended.

use std::future::Future;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::error::TransactionError;
use crate::measurement::{Measurement, Tags};
use crate::transaction::{Transaction, TransactionSummary};

pub struct ExecutionContext {
    current: Mutex<Option<Transaction>>,
    dispatcher: Dispatcher,
}

impl ExecutionContext {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            current: Mutex::new(None),
            dispatcher,
        }
    }

    /// Start a transaction. Nested transactions are rejected.
    pub fn begin(&self) -> Result<Uuid, TransactionError> {
        self.install(Transaction::new(None))
    }

    pub fn begin_with_action(&self, action: impl Into<String>) -> Result<Uuid, TransactionError> {
        self.install(Transaction::new(Some(action.into())))
    }

    fn install(&self, tx: Transaction) -> Result<Uuid, TransactionError> {
        let mut current = self.current.lock();
        if let Some(active) = current.as_ref() {
            return Err(TransactionError::AlreadyActive(active.id()));
        }
        let id = tx.id();
        *current = Some(tx);
        Ok(id)
    }

    pub fn current_id(&self) -> Option<Uuid> {
        self.current.lock().as_ref().map(Transaction::id)
    }

    pub fn is_active(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Run `f` against the current transaction, if any.
    ///
    /// `f` runs with the context lock held; calling back into this context
    /// from `f` deadlocks.
    pub(crate) fn with_transaction<R>(&self, f: impl FnOnce(&mut Transaction) -> R) -> Option<R> {
        self.current.lock().as_mut().map(f)
    }

    pub fn record_duration(&self, name: &str, seconds: f64, tags: Tags) {
        if let Some(tx) = self.current.lock().as_mut() {
            tx.record_duration(name, seconds, tags);
            return;
        }
        self.dispatcher
            .record_untracked(Measurement::new(name, seconds).with_tags(&tags));
    }

    pub fn increment(&self, name: &str, delta: f64) {
        self.increment_tagged(name, delta, Tags::new());
    }

    pub fn increment_tagged(&self, name: &str, delta: f64, tags: Tags) {
        if let Some(tx) = self.current.lock().as_mut() {
            tx.increment_tagged(name, delta, tags);
            return;
        }
        self.dispatcher
            .record_untracked(Measurement::new(name, delta).with_tags(&tags));
    }

    pub fn set(&self, name: &str, value: f64) {
        if let Some(tx) = self.current.lock().as_mut() {
            tx.set(name, value);
            return;
        }
        self.dispatcher.record_untracked(Measurement::new(name, value));
    }

    /// No-op without a current transaction.
    pub fn add_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Some(tx) = self.current.lock().as_mut() {
            tx.add_tag(key, value);
        }
    }

    /// No-op without a current transaction.
    pub fn set_action(&self, action: impl Into<String>) {
        if let Some(tx) = self.current.lock().as_mut() {
            tx.set_action(action);
        }
    }

    /// Detach the current transaction and queue its measurements.
    ///
    /// Never fails on sink problems: full queues and closed dispatchers are
    /// logged and the measurements dropped.
    pub fn finish(&self) -> Option<TransactionSummary> {
        let tx = self.current.lock().take()?;
        let id = tx.id();
        let action = tx.action().map(str::to_string);

        let (measurements, duration) = tx.into_measurements();
        let count = measurements.len();
        let batches = self.dispatcher.submit_measurements(measurements, "transaction");

        tracing::debug!(
            transaction = %id,
            action = action.as_deref().unwrap_or("-"),
            measurements = count,
            batches,
            elapsed_ms = duration.as_millis() as u64,
            "transaction finished"
        );

        Some(TransactionSummary {
            id,
            action,
            duration,
            measurements: count,
            batches,
        })
    }

    /// Run `fut` inside a fresh transaction and finish it afterwards.
    ///
    /// If a transaction is already active the future runs inside it and
    /// nothing is finished here.
    pub async fn scope<F, T>(&self, action: impl Into<String>, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let owned = match self.begin_with_action(action) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "running scope inside the active transaction");
                false
            }
        };
        let output = fut.await;
        if owned {
            self.finish();
        }
        output
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if self.current.get_mut().is_some() {
            tracing::debug!("flushing transaction left open on a dropped context");
            self.finish();
        }
    }
}
