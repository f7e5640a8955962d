//! Runtime configuration.
//!
//! Loaded from a TOML file, then patched from `CALLMETER_*` environment
//! variables. Every field has a default so an empty file is valid.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

// ─── Types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Master switch. Disabled means nothing is delivered and no sampler runs.
    pub enabled: bool,

    /// Seconds between two periodic sampler ticks.
    pub sample_interval_secs: u64,

    /// Method calls faster than this are counted but not timed.
    pub method_call_threshold_ms: u64,

    /// Upper bound on measurements per delivered batch.
    pub max_batch_size: usize,

    /// Batches the dispatch queue holds before dropping new ones.
    pub queue_capacity: usize,

    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,

    pub sink: SinkConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Log,
    Udp,
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub host: String,
    pub port: u16,
    pub redis_url: String,
    pub redis_key: String,
    pub redis_max_len: usize,
    pub timeout_ms: u64,
    /// Line-protocol lines per UDP datagram.
    pub packet_size: usize,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Redis instance backing the demo user store.
    pub redis_url: String,
    /// Background demo workers; zero disables the load generator.
    pub demo_workers: u32,
}

// ─── Defaults ────────────────────────────────────────────────────

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_interval_secs: 15,
            method_call_threshold_ms: 0,
            max_batch_size: 500,
            queue_capacity: 1024,
            log_level: "info".into(),
            sink: SinkConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Log,
            host: "127.0.0.1".into(),
            port: 8089,
            redis_url: "redis://127.0.0.1:6379/".into(),
            redis_key: "callmeter:measurements".into(),
            redis_max_len: 100_000,
            timeout_ms: 1_000,
            packet_size: 1,
            max_retries: 2,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".into(),
            redis_url: "redis://127.0.0.1:6379/".into(),
            demo_workers: 0,
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────

impl MetricsConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Patch fields from environment-style lookups.
    ///
    /// Takes the lookup as a closure so tests don't touch the real process
    /// environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CALLMETER_ENABLED") {
            self.enabled = matches!(v.trim(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = lookup("CALLMETER_SAMPLE_INTERVAL") {
            self.sample_interval_secs = v.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("CALLMETER_SAMPLE_INTERVAL is not a number: {v}"))
            })?;
        }
        if let Some(v) = lookup("CALLMETER_SINK") {
            self.sink.kind = match v.trim() {
                "log" => SinkKind::Log,
                "udp" => SinkKind::Udp,
                "redis" => SinkKind::Redis,
                "memory" => SinkKind::Memory,
                other => {
                    return Err(ConfigError::Invalid(format!("unknown sink kind '{other}'")))
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval_secs == 0 {
            return Err(ConfigError::Invalid("sample_interval_secs must be > 0".into()));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("max_batch_size must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be > 0".into()));
        }
        if self.sink.packet_size == 0 {
            return Err(ConfigError::Invalid("sink.packet_size must be > 0".into()));
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn method_call_threshold(&self) -> Duration {
        Duration::from_millis(self.method_call_threshold_ms)
    }
}

impl SinkConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}
