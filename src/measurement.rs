use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Tag keys and values shared by every producer.
pub mod tags {
    pub const SCOPE: &str = "scope";
    pub const TRANSACTION: &str = "transaction";
    pub const ACTION: &str = "action";
    pub const METHOD: &str = "method";
    pub const ERROR: &str = "error";

    pub const SCOPE_TRANSACTION: &str = "transaction";
    pub const SCOPE_UNTRACKED: &str = "untracked";
    pub const SCOPE_PROCESS: &str = "process";

    /// Value of the `transaction` tag when nothing encloses the measurement.
    pub const NO_TRANSACTION: &str = "none";
}

/// Metric names emitted by the call wrapper and transactions.
pub mod names {
    pub const METHOD_CALL_DURATION: &str = "method_call_duration";
    pub const METHOD_CALL_COUNT: &str = "method_call_count";
    pub const METHOD_CALL_ERRORS: &str = "method_call_errors";
    pub const TRANSACTION_DURATION: &str = "transaction_duration";
}

pub type Tags = BTreeMap<String, String>;

/// One timestamped data point. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub name: String,
    pub value: f64,
    pub tags: Tags,
    pub timestamp: DateTime<Utc>,
}

impl Measurement {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            tags: Tags::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: &Tags) -> Self {
        for (k, v) in tags {
            self.tags.insert(k.clone(), v.clone());
        }
        self
    }

    /// Add `tags` without replacing keys already set.
    pub fn with_default_tags(mut self, tags: &Tags) -> Self {
        for (k, v) in tags {
            self.tags.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Mark as produced outside of any transaction.
    pub fn untracked(self) -> Self {
        self.with_tag(tags::SCOPE, tags::SCOPE_UNTRACKED)
            .with_tag(tags::TRANSACTION, tags::NO_TRANSACTION)
    }

    /// Mark as a process-level sample.
    pub fn process_level(self) -> Self {
        self.with_tag(tags::SCOPE, tags::SCOPE_PROCESS)
            .with_tag(tags::TRANSACTION, tags::NO_TRANSACTION)
    }
}

/// The unit of delivery. Measurement order inside a batch is preserved
/// all the way to the sink.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub id: Uuid,
    pub measurements: Vec<Measurement>,
}

impl Batch {
    pub fn new(measurements: Vec<Measurement>) -> Self {
        Self {
            id: Uuid::new_v4(),
            measurements,
        }
    }

    /// Split `measurements` into consecutive batches of at most `max` entries.
    pub fn chunked(measurements: Vec<Measurement>, max: usize) -> Vec<Batch> {
        let max = max.max(1);
        let mut batches = Vec::with_capacity(measurements.len().div_ceil(max));
        let mut iter = measurements.into_iter().peekable();
        while iter.peek().is_some() {
            batches.push(Batch::new(iter.by_ref().take(max).collect()));
        }
        batches
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Short id for log lines.
    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }
}
