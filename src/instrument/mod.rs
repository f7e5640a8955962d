//! Call wrapper and registration API.
//!
//! Operations are grouped in scopes. A scope declares its operation names
//! through [`OperationScope`]; the [`Instrumentation`] registry maps each
//! `(scope, operation)` to exactly one [`MethodProbe`]. Implementations are
//! wrapped with [`Instrumented`], which looks up the probe at call time.
//!
//! ```text
//! startup:  instrument_scope::<S>() / instrument_methods::<S>(&[..])
//!               └─► probes[(S::NAME, op)] = MethodProbe   (replace, never stack)
//!
//! runtime:  Instrumented<S>::call(ctx, "op", |inner| inner.op(..))
//!               └─► probe.call ─► ctx (transaction or untracked) + CallStats
//! ```

mod probe;

pub use probe::MethodProbe;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::context::ExecutionContext;
use crate::error::RegistrationError;
use crate::metrics::CallStats;

/// A group of operations that can be instrumented together.
pub trait OperationScope {
    /// Scope name, e.g. `"Repository"`.
    const NAME: &'static str;

    /// Every operation the scope exposes.
    const OPERATIONS: &'static [&'static str];
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeKey {
    pub scope: String,
    pub operation: String,
}

impl ProbeKey {
    pub fn new(scope: &str, operation: &str) -> Self {
        Self {
            scope: scope.to_string(),
            operation: operation.to_string(),
        }
    }
}

impl fmt::Display for ProbeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.scope, self.operation)
    }
}

/// Registry of method probes.
pub struct Instrumentation {
    probes: RwLock<HashMap<ProbeKey, Arc<MethodProbe>>>,
    warned: Mutex<HashSet<ProbeKey>>,
    stats: Arc<CallStats>,
    threshold: Duration,
}

impl Instrumentation {
    pub fn new(stats: Arc<CallStats>, threshold: Duration) -> Self {
        Self {
            probes: RwLock::new(HashMap::new()),
            warned: Mutex::new(HashSet::new()),
            stats,
            threshold,
        }
    }

    /// Register one operation of `S` under a custom measurement tag.
    pub fn instrument_method<S: OperationScope>(
        &self,
        operation: &str,
        tag: &str,
    ) -> Result<Arc<MethodProbe>, RegistrationError> {
        if S::OPERATIONS.is_empty() {
            return Err(RegistrationError::EmptyScope(S::NAME.to_string()));
        }
        if !S::OPERATIONS.contains(&operation) {
            return Err(RegistrationError::UnknownOperation {
                scope: S::NAME.to_string(),
                operation: operation.to_string(),
            });
        }
        if tag.trim().is_empty() {
            return Err(RegistrationError::EmptyTag {
                scope: S::NAME.to_string(),
                operation: operation.to_string(),
            });
        }

        let key = ProbeKey::new(S::NAME, operation);
        let probe = Arc::new(MethodProbe::new(
            key.clone(),
            tag,
            self.stats.clone(),
            self.threshold,
        ));
        if self.probes.write().insert(key.clone(), probe.clone()).is_some() {
            tracing::debug!(probe = %key, tag, "replaced existing probe");
        }
        Ok(probe)
    }

    /// Register the listed operations of `S` with the default `Scope#op` tag.
    ///
    /// Validates every name before registering any of them.
    pub fn instrument_methods<S: OperationScope>(
        &self,
        operations: &[&str],
    ) -> Result<usize, RegistrationError> {
        if S::OPERATIONS.is_empty() {
            return Err(RegistrationError::EmptyScope(S::NAME.to_string()));
        }
        if let Some(unknown) = operations.iter().find(|op| !S::OPERATIONS.contains(*op)) {
            return Err(RegistrationError::UnknownOperation {
                scope: S::NAME.to_string(),
                operation: unknown.to_string(),
            });
        }
        for op in operations {
            self.instrument_method::<S>(op, &default_tag(S::NAME, op))?;
        }
        Ok(operations.len())
    }

    /// Register every operation `S` declares.
    pub fn instrument_scope<S: OperationScope>(&self) -> Result<usize, RegistrationError> {
        self.instrument_methods::<S>(S::OPERATIONS)
    }

    /// Probe for `(scope, operation)`.
    ///
    /// Unregistered keys get a pass-through probe and a one-time warning;
    /// a running process never fails because of missing instrumentation.
    pub fn probe(&self, scope: &str, operation: &str) -> Arc<MethodProbe> {
        let key = ProbeKey::new(scope, operation);
        if let Some(probe) = self.probes.read().get(&key) {
            return probe.clone();
        }
        if self.warned.lock().insert(key.clone()) {
            tracing::warn!(probe = %key, "call to uninstrumented operation");
        }
        Arc::new(MethodProbe::passthrough(key))
    }

    pub fn is_instrumented(&self, scope: &str, operation: &str) -> bool {
        self.probes.read().contains_key(&ProbeKey::new(scope, operation))
    }

    pub fn len(&self) -> usize {
        self.probes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &Arc<CallStats> {
        &self.stats
    }
}

fn default_tag(scope: &str, operation: &str) -> String {
    format!("{scope}#{operation}")
}

/// Decorator composing a real implementation with its scope's probes.
///
/// Implement your operation trait for `Instrumented<YourImpl>` by routing
/// each method through [`Instrumented::call`] or
/// [`Instrumented::call_async`].
pub struct Instrumented<T: OperationScope> {
    inner: T,
    instrumentation: Arc<Instrumentation>,
}

impl<T: OperationScope> Instrumented<T> {
    pub fn new(inner: T, instrumentation: Arc<Instrumentation>) -> Self {
        Self {
            inner,
            instrumentation,
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn call<R, E>(
        &self,
        ctx: &ExecutionContext,
        operation: &str,
        f: impl FnOnce(&T) -> Result<R, E>,
    ) -> Result<R, E> {
        self.instrumentation
            .probe(T::NAME, operation)
            .call(ctx, || f(&self.inner))
    }

    pub async fn call_async<'a, R, E, F, Fut>(
        &'a self,
        ctx: &ExecutionContext,
        operation: &str,
        f: F,
    ) -> Result<R, E>
    where
        F: FnOnce(&'a T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let probe = self.instrumentation.probe(T::NAME, operation);
        probe.call_async(ctx, f(&self.inner)).await
    }
}
