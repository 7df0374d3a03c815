//! Subscriber installation. Kept in its own test binary because it sets the
//! process-wide default dispatcher.

use loadrig_daq::config::RigConfig;
use loadrig_daq::logging::{self, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    let config = TracingConfig::new(Level::ERROR).with_format(OutputFormat::Compact);
    assert!(logging::init(config).is_ok());
    assert!(logging::init(config).is_ok());

    // a later init from configuration is also accepted
    let mut rig = RigConfig::default();
    rig.application.log_format = "json".to_string();
    assert!(logging::init_from_config(&rig).is_ok());
}

#[test]
fn test_init_rejects_invalid_level() {
    let mut rig = RigConfig::default();
    rig.application.log_level = "chatty".to_string();
    assert!(logging::init_from_config(&rig).is_err());
}
