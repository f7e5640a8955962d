//! Installs the global subscriber, so it lives in its own test binary.

use callmeter::logging::init_logging;

#[test]
fn init_logging_installs_once() {
    assert!(init_logging("warn").is_ok());
    assert!(init_logging("warn").is_err());
    tracing::debug!("filtered out below warn");
}
