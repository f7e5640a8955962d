use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::measurement::{names, tags, Measurement, Tags};

/// In-memory aggregate for one unit of work.
///
/// Owned by a single [`crate::ExecutionContext`]; every mutation is a plain
/// in-memory update. Nothing here performs I/O.
#[derive(Debug)]
pub struct Transaction {
    id: Uuid,
    action: Option<String>,
    started_at: DateTime<Utc>,
    started: Instant,
    tags: Tags,
    durations: Vec<Measurement>,
    counters: BTreeMap<(String, Tags), f64>,
    gauges: BTreeMap<(String, Tags), f64>,
}

/// What `finish` reports back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSummary {
    pub id: Uuid,
    pub action: Option<String>,
    pub duration: Duration,
    pub measurements: usize,
    pub batches: usize,
}

impl Transaction {
    pub fn new(action: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            started_at: Utc::now(),
            started: Instant::now(),
            tags: Tags::new(),
            durations: Vec::new(),
            counters: BTreeMap::new(),
            gauges: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn set_action(&mut self, action: impl Into<String>) {
        self.action = Some(action.into());
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Tag attached to every measurement of this transaction on flush.
    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn record_duration(&mut self, name: &str, seconds: f64, tags: Tags) {
        let mut m = Measurement::new(name, seconds);
        m.tags = tags;
        self.durations.push(m);
    }

    pub fn increment(&mut self, name: &str, delta: f64) {
        self.increment_tagged(name, delta, Tags::new());
    }

    pub fn increment_tagged(&mut self, name: &str, delta: f64, tags: Tags) {
        *self.counters.entry((name.to_string(), tags)).or_insert(0.0) += delta;
    }

    /// Last-write-wins gauge.
    pub fn set(&mut self, name: &str, value: f64) {
        self.gauges.insert((name.to_string(), Tags::new()), value);
    }

    pub fn counter(&self, name: &str, tags: &Tags) -> Option<f64> {
        self.counters.get(&(name.to_string(), tags.clone())).copied()
    }

    pub fn durations(&self) -> &[Measurement] {
        &self.durations
    }

    /// Total number of measurements a flush would produce right now.
    pub fn pending(&self) -> usize {
        // +1 for the transaction_duration summary
        self.durations.len() + self.counters.len() + self.gauges.len() + 1
    }

    /// Consume the transaction into attributed measurements.
    ///
    /// Order is durations as recorded, then counters, then gauges, then the
    /// `transaction_duration` summary.
    pub fn into_measurements(self) -> (Vec<Measurement>, Duration) {
        let elapsed = self.started.elapsed();
        let now = Utc::now();

        // Reserved keys always win; transaction tags never replace a
        // measurement's own keys such as `method` or `error`.
        let shared = self.tags;
        let mut attribution = Tags::new();
        attribution.insert(tags::SCOPE.into(), tags::SCOPE_TRANSACTION.into());
        attribution.insert(tags::TRANSACTION.into(), self.id.to_string());
        if let Some(action) = &self.action {
            attribution.insert(tags::ACTION.into(), action.clone());
        }

        let mut out = Vec::with_capacity(
            self.durations.len() + self.counters.len() + self.gauges.len() + 1,
        );

        for m in self.durations {
            out.push(m.with_default_tags(&shared).with_tags(&attribution));
        }
        for ((name, t), value) in self.counters.into_iter().chain(self.gauges) {
            let mut m = Measurement::new(name, value).at(now);
            m.tags = t;
            out.push(m.with_default_tags(&shared).with_tags(&attribution));
        }
        out.push(
            Measurement::new(names::TRANSACTION_DURATION, elapsed.as_secs_f64())
                .at(now)
                .with_default_tags(&shared)
                .with_tags(&attribution),
        );

        (out, elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method_tags(method: &str) -> Tags {
        [(tags::METHOD.to_string(), method.to_string())].into_iter().collect()
    }

    #[test]
    fn test_counters_accumulate_per_tag_set() {
        let mut tx = Transaction::new(None);
        tx.increment_tagged("method_call_count", 1.0, method_tags("db.fetch"));
        tx.increment_tagged("method_call_count", 1.0, method_tags("db.fetch"));
        tx.increment_tagged("method_call_count", 1.0, method_tags("db.store"));
        tx.increment("new_redis_connections", 1.0);

        assert_eq!(tx.counter("method_call_count", &method_tags("db.fetch")), Some(2.0));
        assert_eq!(tx.counter("method_call_count", &method_tags("db.store")), Some(1.0));
        assert_eq!(tx.counter("new_redis_connections", &Tags::new()), Some(1.0));
        assert_eq!(tx.counter("missing", &Tags::new()), None);
    }

    #[test]
    fn test_flush_attributes_every_measurement() {
        let mut tx = Transaction::new(Some("GET /api/users/:id".into()));
        let id = tx.id();
        tx.add_tag("worker", "3");
        tx.record_duration("method_call_duration", 0.25, method_tags("db.fetch"));
        tx.increment("new_redis_connections", 1.0);
        tx.set("rows_loaded", 12.0);

        assert_eq!(tx.pending(), 4);
        let (measurements, _) = tx.into_measurements();
        assert_eq!(measurements.len(), 4);

        for m in &measurements {
            assert_eq!(m.tag(tags::SCOPE), Some(tags::SCOPE_TRANSACTION));
            assert_eq!(m.tag(tags::TRANSACTION), Some(id.to_string().as_str()));
            assert_eq!(m.tag(tags::ACTION), Some("GET /api/users/:id"));
            assert_eq!(m.tag("worker"), Some("3"));
        }

        let names: Vec<&str> = measurements.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "method_call_duration",
                "new_redis_connections",
                "rows_loaded",
                names::TRANSACTION_DURATION,
            ]
        );
        assert_eq!(measurements[0].tag(tags::METHOD), Some("db.fetch"));
    }

    #[test]
    fn test_transaction_tags_do_not_replace_call_tags() {
        let mut tx = Transaction::new(Some("GET /api/users/:id".into()));
        let id = tx.id();
        let mut call_tags = method_tags("db.fetch");
        call_tags.insert(tags::ERROR.into(), "false".into());
        tx.record_duration(names::METHOD_CALL_DURATION, 0.1, call_tags);
        tx.increment_tagged(names::METHOD_CALL_COUNT, 1.0, method_tags("db.fetch"));

        tx.add_tag(tags::METHOD, "handler");
        tx.add_tag(tags::ERROR, "true");
        tx.add_tag(tags::TRANSACTION, "spoofed");
        tx.add_tag("region", "eu");

        let (measurements, _) = tx.into_measurements();
        let duration = &measurements[0];
        assert_eq!(duration.tag(tags::METHOD), Some("db.fetch"));
        assert_eq!(duration.tag(tags::ERROR), Some("false"));
        assert_eq!(duration.tag("region"), Some("eu"));
        assert_eq!(measurements[1].tag(tags::METHOD), Some("db.fetch"));

        // untagged entries pick the transaction tags up
        let summary = measurements.last().unwrap();
        assert_eq!(summary.tag(tags::METHOD), Some("handler"));
        for m in &measurements {
            assert_eq!(m.tag(tags::TRANSACTION), Some(id.to_string().as_str()));
        }
    }

    #[test]
    fn test_gauge_is_last_write_wins() {
        let mut tx = Transaction::new(None);
        tx.set("queue_depth", 4.0);
        tx.set("queue_depth", 9.0);

        let (measurements, _) = tx.into_measurements();
        let depth: Vec<_> = measurements.iter().filter(|m| m.name == "queue_depth").collect();
        assert_eq!(depth.len(), 1);
        assert_eq!(depth[0].value, 9.0);
    }

    #[test]
    fn test_empty_transaction_still_reports_duration() {
        let (measurements, _) = Transaction::new(None).into_measurements();
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0].name, names::TRANSACTION_DURATION);
        assert_eq!(measurements[0].tag(tags::ACTION), None);
    }
}
