//! Rig configuration using Figment.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`RigConfig::default`])
//! 2. A TOML file (`config/rig.toml` unless another path is given)
//! 3. Environment variables prefixed with `LOADRIG_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use loadrig_daq::config::RigConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // LOADRIG_DEVICE__PORT=/dev/ttyUSB1 overrides the file
//! let config = RigConfig::load()?;
//! config.validate()?;
//! println!("Polling {} every {:?}", config.device.port, config.poll_interval());
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/rig.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "LOADRIG_";

/// Top-level rig configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial / Modbus device settings
    #[serde(default)]
    pub device: DeviceConfig,
    /// Polling cadence and decimation thresholds
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// History export settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Simulated load cell used when no hardware is attached
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Serial link to the force transducer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Port identifier, e.g. `/dev/ttyUSB0` or `COM3`
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate (8 data bits, no parity, 1 stop bit are fixed)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Modbus unit (slave) id
    #[serde(default)]
    pub unit_id: u8,
    /// Per-read transport timeout in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

/// Acquisition loop and decimation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Delay between the end of one iteration and the start of the next
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Minimum load change (tons) that forces acceptance
    #[serde(default = "default_hold_threshold")]
    pub hold_threshold_tons: f64,
    /// Maximum time between accepted samples for a steady load
    #[serde(default = "default_heartbeat")]
    pub heartbeat_ms: u64,
}

/// History export configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Output directory for CSV history and session summaries
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Ramp-and-hold load cell simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Load at which the ramp stops (kg)
    #[serde(default = "default_max_load")]
    pub max_load_kg: f64,
    /// Smallest per-read load increment (kg)
    #[serde(default = "default_min_step")]
    pub min_step_kg: f64,
    /// Largest per-read load increment (kg)
    #[serde(default = "default_max_step")]
    pub max_step_kg: f64,
    /// Fixed RNG seed for reproducible runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Fail every read after this many successful ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_after_reads: Option<u64>,
}

// Default value functions
fn default_name() -> String {
    "Load Test Rig".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_port() -> String {
    if cfg!(windows) {
        "COM3".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_read_timeout() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_hold_threshold() -> f64 {
    0.02
}

fn default_heartbeat() -> u64 {
    5000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_load() -> f64 {
    5000.0
}

fn default_min_step() -> f64 {
    50.0
}

fn default_max_step() -> f64 {
    150.0
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            unit_id: 0,
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            hold_threshold_tons: default_hold_threshold(),
            heartbeat_ms: default_heartbeat(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            max_load_kg: default_max_load(),
            min_step_kg: default_min_step(),
            max_step_kg: default_max_step(),
            seed: None,
            fail_after_reads: None,
        }
    }
}

impl RigConfig {
    /// Load configuration from `config/rig.toml` and environment variables.
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// The layered provider chain, exposed so callers can merge extra sources.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(RigConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level = self.application.log_level.to_lowercase();
        if !valid_levels.contains(&level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        let format = self.application.log_format.to_lowercase();
        if !valid_formats.contains(&format.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.device.port.trim().is_empty() {
            return Err(DaqError::Configuration(
                "device.port must not be empty".to_string(),
            ));
        }
        if self.device.baud_rate == 0 {
            return Err(DaqError::Configuration(
                "device.baud_rate must be positive".to_string(),
            ));
        }
        if self.device.read_timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "device.read_timeout_ms must be positive".to_string(),
            ));
        }

        if self.acquisition.poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "acquisition.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.acquisition.heartbeat_ms == 0 {
            return Err(DaqError::Configuration(
                "acquisition.heartbeat_ms must be positive".to_string(),
            ));
        }
        let threshold = self.acquisition.hold_threshold_tons;
        if threshold.is_nan() || threshold < 0.0 {
            return Err(DaqError::Configuration(format!(
                "Invalid hold_threshold_tons {}. Must be a non-negative number",
                threshold
            )));
        }

        let sim = &self.simulator;
        if sim.max_load_kg.is_nan() || sim.max_load_kg <= 0.0 {
            return Err(DaqError::Configuration(
                "simulator.max_load_kg must be positive".to_string(),
            ));
        }
        if sim.min_step_kg.is_nan()
            || sim.max_step_kg.is_nan()
            || sim.min_step_kg < 0.0
            || sim.min_step_kg > sim.max_step_kg
        {
            return Err(DaqError::Configuration(format!(
                "Invalid simulator step range {}..={} kg",
                sim.min_step_kg, sim.max_step_kg
            )));
        }

        Ok(())
    }

    /// Delay between acquisition iterations.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.acquisition.poll_interval_ms)
    }

    /// Maximum gap between accepted samples.
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.acquisition.heartbeat_ms)
    }

    /// Per-read transport timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.device.read_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RigConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device.baud_rate, 9600);
        assert_eq!(config.device.unit_id, 0);
        assert_eq!(config.poll_interval(), Duration::from_millis(1000));
        assert_eq!(config.heartbeat(), Duration::from_millis(5000));
        assert_eq!(config.acquisition.hold_threshold_tons, 0.02);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = RigConfig::default();
        config.application.log_level = "invalid".to_string();
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_cadence_rejected() {
        let mut config = RigConfig::default();
        config.acquisition.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_simulator_range_rejected() {
        let mut config = RigConfig::default();
        config.simulator.min_step_kg = 200.0;
        config.simulator.max_step_kg = 100.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nan_simulator_step_rejected() {
        let mut config = RigConfig::default();
        config.simulator.max_step_kg = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(_))
        ));

        let mut config = RigConfig::default();
        config.simulator.min_step_kg = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let mut config = RigConfig::default();
        config.acquisition.hold_threshold_tons = -0.5;
        assert!(config.validate().is_err());
    }
}
