use std::collections::HashMap;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

// ─── Configuration ───────────────────────────────────────────────

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Process-wide per-method call statistics.
///
/// Every probe invocation lands here regardless of transactions, so the
/// metrics endpoint can show latency percentiles without reading back
/// from the sink.
pub struct CallStats {
    methods: Mutex<HashMap<String, MethodEntry>>,
    started: Instant,
}

/// Latency breakdown in microseconds.
#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub p999_us: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodSummary {
    pub method: String,
    pub calls: u64,
    pub errors: u64,
    pub latency: LatencySummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub methods: Vec<MethodSummary>,
    pub total_calls: u64,
    pub total_errors: u64,
    pub uptime_secs: f64,
}

// ─── Internal state ──────────────────────────────────────────────

struct MethodEntry {
    calls: u64,
    errors: u64,
    hist: Histogram<u64>,
}

impl MethodEntry {
    fn new() -> Self {
        Self {
            calls: 0,
            errors: 0,
            // constant bounds are always valid
            hist: Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
                .expect("histogram bounds"),
        }
    }

    fn summary(&self, method: &str) -> MethodSummary {
        MethodSummary {
            method: method.to_string(),
            calls: self.calls,
            errors: self.errors,
            latency: LatencySummary::from_histogram(&self.hist),
        }
    }
}

// ─── CallStats impl ──────────────────────────────────────────────

impl CallStats {
    pub fn new() -> Self {
        Self {
            methods: Mutex::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    /// Record one invocation of `method`.
    pub fn record(&self, method: &str, elapsed: Duration, success: bool) {
        // clamp to the histogram's range
        let us = (elapsed.as_micros() as u64).clamp(HIST_LOW, HIST_HIGH);

        let mut methods = self.methods.lock();
        let entry = methods
            .entry(method.to_string())
            .or_insert_with(MethodEntry::new);
        entry.calls += 1;
        if !success {
            entry.errors += 1;
        }
        let _ = entry.hist.record(us);
    }

    pub fn method(&self, method: &str) -> Option<MethodSummary> {
        self.methods.lock().get(method).map(|e| e.summary(method))
    }

    pub fn reset(&self) {
        self.methods.lock().clear();
    }

    /// Read-only view, methods sorted by name.
    pub fn snapshot(&self) -> StatsSnapshot {
        let methods = self.methods.lock();
        let mut summaries: Vec<MethodSummary> =
            methods.iter().map(|(name, e)| e.summary(name)).collect();
        drop(methods);
        summaries.sort_by(|a, b| a.method.cmp(&b.method));

        StatsSnapshot {
            total_calls: summaries.iter().map(|s| s.calls).sum(),
            total_errors: summaries.iter().map(|s| s.errors).sum(),
            methods: summaries,
            uptime_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

impl Default for CallStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencySummary {
    /// Zeroed when the histogram is empty.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.len() == 0 {
            return Self {
                min_us: 0,
                max_us: 0,
                mean_us: 0.0,
                p50_us: 0,
                p95_us: 0,
                p99_us: 0,
                p999_us: 0,
            };
        }

        Self {
            min_us: hist.min(),
            max_us: hist.max(),
            mean_us: hist.mean(),
            p50_us: hist.value_at_quantile(0.50),
            p95_us: hist.value_at_quantile(0.95),
            p99_us: hist.value_at_quantile(0.99),
            p999_us: hist.value_at_quantile(0.999),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_calls_and_errors() {
        let stats = CallStats::new();
        stats.record("db.fetch", Duration::from_millis(2), true);
        stats.record("db.fetch", Duration::from_millis(4), false);
        stats.record("db.store", Duration::from_micros(300), true);

        let fetch = stats.method("db.fetch").unwrap();
        assert_eq!(fetch.calls, 2);
        assert_eq!(fetch.errors, 1);
        assert!(fetch.latency.max_us >= 4_000);
        assert!(fetch.latency.min_us <= 2_002);

        let snap = stats.snapshot();
        assert_eq!(snap.total_calls, 3);
        assert_eq!(snap.total_errors, 1);
        assert_eq!(
            snap.methods.iter().map(|m| m.method.as_str()).collect::<Vec<_>>(),
            vec!["db.fetch", "db.store"]
        );
    }

    #[test]
    fn test_zero_duration_is_clamped() {
        let stats = CallStats::new();
        stats.record("noop", Duration::ZERO, true);
        assert_eq!(stats.method("noop").unwrap().latency.min_us, 1);
    }

    #[test]
    fn test_reset() {
        let stats = CallStats::new();
        stats.record("db.fetch", Duration::from_millis(1), true);
        stats.reset();
        assert!(stats.method("db.fetch").is_none());
        assert_eq!(stats.snapshot().total_calls, 0);
    }

    #[test]
    fn test_empty_latency_summary() {
        let hist = Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG).unwrap();
        let summary = LatencySummary::from_histogram(&hist);
        assert_eq!(summary.p99_us, 0);
        assert_eq!(summary.mean_us, 0.0);
    }
}
