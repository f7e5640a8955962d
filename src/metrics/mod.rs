pub mod collector;
pub mod stream;

pub use collector::{CallStats, LatencySummary, MethodSummary, StatsSnapshot};

use serde::Serialize;

use crate::dispatch::DispatchStats;

/// Everything the metrics endpoint reports: call statistics plus the
/// health of the delivery path.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub enabled: bool,
    pub calls: StatsSnapshot,
    pub dispatch: DispatchStats,
    pub instrumented_operations: usize,
    pub untracked_pending: usize,
}
