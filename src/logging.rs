//! Log output setup.

use std::io;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset: `fallback` for this crate, warn
/// for dependencies.
pub fn default_filter(fallback: &str) -> String {
    format!("warn,callmeter={fallback}")
}

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// `fallback` (normally the configured `log_level`).
///
/// Call once at startup; a second call returns an error.
pub fn init_logging(fallback: &str) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(fallback)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(true))
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        let directive = default_filter("debug");
        assert_eq!(directive, "warn,callmeter=debug");
        assert!(EnvFilter::try_new(directive).is_ok());
    }
}
