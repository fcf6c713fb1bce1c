//! Tracing initialisation is safe to repeat.

use tracing::Level;
use xmcd_daq::config::StationConfig;
use xmcd_daq::tracing_init::{self, OutputFormat, TracingConfig};

#[test]
fn test_init_is_idempotent() {
    let config = TracingConfig::new(Level::DEBUG)
        .with_format(OutputFormat::Compact)
        .with_ansi(false);
    assert!(tracing_init::init(config).is_ok());

    // A second global subscriber is refused by tracing; init treats that as success.
    assert!(tracing_init::init(TracingConfig::default()).is_ok());
    assert!(tracing_init::init_from_config(&StationConfig::default()).is_ok());

    tracing::info!(target: "xmcd_daq", "logging after repeated init");
}

#[test]
fn test_invalid_format_rejected_before_init() {
    let mut config = StationConfig::default();
    config.application.log_format = "xml".to_string();
    assert!(tracing_init::init_from_config(&config).is_err());
}
