//! Tracing setup for the `loadrig` binary.
//!
//! The `[application]` section picks the default level and one of three
//! output formats. Directives in `RUST_LOG` are layered on top of the
//! configured level, so `RUST_LOG=loadrig_daq::device=trace` works without
//! touching the config file.
//!
//! # Example
//! ```no_run
//! use loadrig_daq::{config::RigConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RigConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!(port = %config.device.port, "rig starting");
//! # Ok(())
//! # }
//! ```

use crate::config::RigConfig;
use crate::error::{AppResult, DaqError};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, coloured; for watching a test at the bench
    Pretty,
    /// One line per event, no colour; for unattended runs
    Compact,
    /// JSON lines for log collection
    Json,
}

impl OutputFormat {
    /// Parse a format name (case-insensitive).
    pub fn parse(name: &str) -> AppResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            _ => Err(DaqError::Configuration(format!(
                "unknown log format '{}' (expected pretty, compact or json)",
                name
            ))),
        }
    }
}

/// Level and format for the global subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` names no directive for a target
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl TracingConfig {
    /// Pretty output at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: OutputFormat::Pretty,
        }
    }

    /// Read level and format from the `[application]` section.
    pub fn from_rig_config(config: &RigConfig) -> AppResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: OutputFormat::parse(&config.application.log_format)?,
        })
    }

    /// Use `format` instead of pretty output.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level).into())
            .from_env_lossy()
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        match self.format {
            OutputFormat::Pretty => fmt::layer().pretty().boxed(),
            OutputFormat::Compact => fmt::layer().compact().with_ansi(false).boxed(),
            OutputFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        }
    }
}

/// Install the global subscriber described by the `[application]` section.
pub fn init_from_config(config: &RigConfig) -> AppResult<()> {
    init(TracingConfig::from_rig_config(config)?)
}

/// Install the global subscriber.
///
/// Does nothing when a subscriber is already installed, e.g. by a test
/// harness or an embedding application.
pub fn init(config: TracingConfig) -> AppResult<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(config.layer().with_filter(config.filter()))
        .try_init()
        .map_err(|err| DaqError::Configuration(format!("tracing init failed: {}", err)))
}

/// Parse a level name (case-insensitive).
pub fn parse_log_level(level: &str) -> AppResult<Level> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(DaqError::Configuration(format!(
            "unknown log level '{}' (expected trace, debug, info, warn or error)",
            level
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("INFO").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("Warn").unwrap(), Level::WARN);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn parses_formats() {
        assert_eq!(OutputFormat::parse("JSON").unwrap(), OutputFormat::Json);
        assert_eq!(
            OutputFormat::parse("compact").unwrap(),
            OutputFormat::Compact
        );
        assert!(OutputFormat::parse("xml").is_err());
    }

    #[test]
    fn reads_application_section() {
        let mut config = RigConfig::default();
        config.application.log_level = "debug".to_string();
        config.application.log_format = "json".to_string();

        assert_eq!(
            TracingConfig::from_rig_config(&config).unwrap(),
            TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Json)
        );
    }

    #[test]
    fn defaults_to_pretty_info() {
        let config = TracingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, OutputFormat::Pretty);
    }
}
