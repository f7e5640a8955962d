use std::collections::BTreeMap;
use std::fs;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::GaugeSource;
use crate::error::SamplerError;
use crate::measurement::Measurement;

// ─── Memory ──────────────────────────────────────────────────────

/// Resident set size, read from `/proc/self/status`.
pub struct MemorySource;

impl GaugeSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn collect(&self) -> Result<Vec<Measurement>, SamplerError> {
        let status = fs::read_to_string("/proc/self/status")
            .map_err(|e| SamplerError::new("memory", e.to_string()))?;
        let rss_kb = parse_status_kb(&status, "VmRSS:")
            .ok_or_else(|| SamplerError::new("memory", "VmRSS missing from status"))?;

        let mut out = vec![Measurement::new("memory_rss_bytes", (rss_kb * 1024) as f64)];
        if let Some(peak_kb) = parse_status_kb(&status, "VmHWM:") {
            out.push(Measurement::new("memory_peak_rss_bytes", (peak_kb * 1024) as f64));
        }
        Ok(out)
    }
}

/// Value of a `Key:   1234 kB` line.
fn parse_status_kb(status: &str, key: &str) -> Option<u64> {
    status
        .lines()
        .find(|l| l.starts_with(key))
        .and_then(|l| l[key.len()..].split_whitespace().next())
        .and_then(|v| v.parse().ok())
}

// ─── File descriptors ────────────────────────────────────────────

pub struct FileDescriptorSource;

impl GaugeSource for FileDescriptorSource {
    fn name(&self) -> &str {
        "file_descriptors"
    }

    fn collect(&self) -> Result<Vec<Measurement>, SamplerError> {
        let open = fs::read_dir("/proc/self/fd")
            .map_err(|e| SamplerError::new("file_descriptors", e.to_string()))?
            .count();
        Ok(vec![Measurement::new("file_descriptors", open as f64)])
    }
}

// ─── Async runtime ───────────────────────────────────────────────

/// Worker and live-task counts of the current Tokio runtime.
pub struct RuntimeSource;

impl GaugeSource for RuntimeSource {
    fn name(&self) -> &str {
        "runtime"
    }

    fn collect(&self) -> Result<Vec<Measurement>, SamplerError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| SamplerError::new("runtime", e.to_string()))?;
        let metrics = handle.metrics();
        Ok(vec![
            Measurement::new("runtime_workers", metrics.num_workers() as f64),
            Measurement::new("runtime_alive_tasks", metrics.num_alive_tasks() as f64),
        ])
    }
}

// ─── Connection gauges ───────────────────────────────────────────

/// Named process-wide counters, e.g. open Redis connections.
///
/// Cloning shares the same set. Application code holds
/// [`ConnectionGauge`] handles and updates them with atomics; the sampler
/// reads them on each tick.
#[derive(Clone, Default)]
pub struct ConnectionGauges {
    gauges: Arc<RwLock<BTreeMap<String, Arc<AtomicI64>>>>,
}

#[derive(Clone)]
pub struct ConnectionGauge(Arc<AtomicI64>);

impl ConnectionGauge {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl ConnectionGauges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `name`, created at zero on first use.
    pub fn gauge(&self, name: &str) -> ConnectionGauge {
        if let Some(g) = self.gauges.read().get(name) {
            return ConnectionGauge(g.clone());
        }
        let mut gauges = self.gauges.write();
        let g = gauges.entry(name.to_string()).or_default();
        ConnectionGauge(g.clone())
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.gauges.read().get(name).map(|g| g.load(Ordering::Relaxed))
    }
}

impl GaugeSource for ConnectionGauges {
    fn name(&self) -> &str {
        "connections"
    }

    fn collect(&self) -> Result<Vec<Measurement>, SamplerError> {
        Ok(self
            .gauges
            .read()
            .iter()
            .map(|(name, g)| Measurement::new(name.as_str(), g.load(Ordering::Relaxed) as f64))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_kb() {
        let status = "Name:\tcallmeter\nVmHWM:\t   20480 kB\nVmRSS:\t   10240 kB\n";
        assert_eq!(parse_status_kb(status, "VmRSS:"), Some(10240));
        assert_eq!(parse_status_kb(status, "VmHWM:"), Some(20480));
        assert_eq!(parse_status_kb(status, "VmSwap:"), None);
    }

    #[test]
    fn test_connection_gauges_shared_between_clones() {
        let gauges = ConnectionGauges::new();
        let redis = gauges.gauge("redis_connections");
        let clone = gauges.clone();

        redis.increment();
        redis.increment();
        clone.gauge("redis_connections").decrement();

        assert_eq!(gauges.get("redis_connections"), Some(1));
        let collected = clone.collect().unwrap();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].name, "redis_connections");
        assert_eq!(collected[0].value, 1.0);
    }

    #[test]
    fn test_gauges_from_many_threads() {
        let gauges = ConnectionGauges::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let g = gauges.gauge("pool");
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        g.increment();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(gauges.get("pool"), Some(8000));
    }

    #[test]
    fn test_runtime_source_needs_runtime() {
        assert!(RuntimeSource.collect().is_err());
    }

    #[tokio::test]
    async fn test_runtime_source_inside_runtime() {
        let ms = RuntimeSource.collect().unwrap();
        assert_eq!(ms[0].name, "runtime_workers");
        assert!(ms[0].value >= 1.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_proc_sources_on_linux() {
        let memory = MemorySource.collect().unwrap();
        assert!(memory[0].value > 0.0);
        let fds = FileDescriptorSource.collect().unwrap();
        assert!(fds[0].value >= 3.0);
    }
}
