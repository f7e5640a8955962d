//! Error types for the instrumentation path.
//!
//! Only [`RegistrationError`], [`ConfigError`] and [`TransactionError`] ever
//! reach application code. Sink and sampler errors are logged and dropped
//! by their callers.

use thiserror::Error;
use uuid::Uuid;

/// Failure to deliver a batch of measurements.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("network error: {0}")]
    Network(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("sink timed out after {0}ms")]
    Timeout(u64),

    #[error("dispatch queue full, batch of {0} measurements dropped")]
    QueueFull(usize),

    #[error("dispatcher is shut down")]
    Closed,

    #[error("backend error: {0}")]
    Backend(String),
}

impl SinkError {
    /// Whether a delivery attempt that failed this way may be tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<redis::RedisError> for SinkError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
            Self::Network(e.to_string())
        } else {
            Self::Backend(e.to_string())
        }
    }
}

/// Misuse of the transaction lifecycle on an execution context.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction {0} is already active on this context")]
    AlreadyActive(Uuid),
}

/// One gauge source failing during one sampler tick.
#[derive(Error, Debug)]
#[error("sampler source '{source_name}' failed: {message}")]
pub struct SamplerError {
    pub source_name: String,
    pub message: String,
}

impl SamplerError {
    pub fn new(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

/// Failure to wrap an operation at startup.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("scope '{scope}' has no operation named '{operation}'")]
    UnknownOperation { scope: String, operation: String },

    #[error("scope '{0}' declares no operations")]
    EmptyScope(String),

    #[error("empty measurement tag for {scope}.{operation}")]
    EmptyTag { scope: String, operation: String },
}

/// Errors while loading [`crate::config::MetricsConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_sink_errors() {
        assert!(SinkError::Network("reset".into()).is_retryable());
        assert!(SinkError::Timeout(100).is_retryable());
        assert!(!SinkError::QueueFull(3).is_retryable());
        assert!(!SinkError::Serialization("nan".into()).is_retryable());
        assert!(!SinkError::Closed.is_retryable());
    }

    #[test]
    fn test_registration_error_display() {
        let err = RegistrationError::UnknownOperation {
            scope: "Repository".into(),
            operation: "blame".into(),
        };
        assert_eq!(err.to_string(), "scope 'Repository' has no operation named 'blame'");
    }

    #[test]
    fn test_sampler_error_display() {
        let err = SamplerError::new("memory", "statm unreadable");
        assert_eq!(err.to_string(), "sampler source 'memory' failed: statm unreadable");
    }
}
