//! Request and job instrumentation.
//!
//! Wrap implementations with [`Instrumented`] to time and count their
//! operations, group the measurements of one request or job into a
//! transaction through its [`ExecutionContext`], sample process gauges on
//! an interval with [`Sampler`], and ship everything to a [`Sink`] in the
//! background.
//!
//! ```text
//!  Instrumented<S>::call ──► ExecutionContext ──► Transaction ──┐
//!                                  │ (no transaction)           │ finish()
//!                                  └─► untracked buffer ────────┤
//!  Sampler tick ────────────────────────────────────────────────┤
//!                                                               ▼
//!                                  Dispatcher (bounded queue) ──► SinkAdapter ──► Sink
//! ```

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod instrument;
pub mod jobs;
pub mod logging;
pub mod measurement;
pub mod meter;
pub mod metrics;
pub mod middleware;
pub mod redis_client;
pub mod sampler;
pub mod sink;
pub mod transaction;

pub use config::MetricsConfig;
pub use context::ExecutionContext;
pub use dispatch::{DispatchOptions, Dispatcher};
pub use error::{ConfigError, RegistrationError, SamplerError, SinkError, TransactionError};
pub use instrument::{Instrumentation, Instrumented, MethodProbe, OperationScope};
pub use jobs::JobRunner;
pub use measurement::{Batch, Measurement, Tags};
pub use meter::Meter;
pub use sampler::{GaugeSource, Sampler, SamplerHandle};
pub use sink::{Sink, SinkAdapter};
pub use transaction::{Transaction, TransactionSummary};
