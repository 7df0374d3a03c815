//! Custom error types for the acquisition core.
//!
//! `DaqError` is the single error type returned by the library. It is built with
//! `thiserror` and groups failures by who has to react to them:
//!
//! - **`Connection`**: the serial transport could not be opened. Carries the port and a
//!   [`ConnectionFailure`] kind so operators can tell a missing adapter from a permissions
//!   problem. Never retried by the library.
//! - **`Transport`**: a register read failed on a transport that was open. Terminates
//!   the acquisition loop, which transitions to `Faulted`.
//! - **`Precondition`**: an operation was invoked in the wrong state (not connected,
//!   already polling, metadata incomplete). Nothing changes when this is returned.
//! - **`ReadOnlyKey`** / **`TypeMismatch`**: rejected writes through the generic
//!   session-store `set`.
//! - **`Config`** / **`Configuration`**: figment extraction errors and semantic validation
//!   errors respectively.
//! - **`Io`**, **`Csv`**, **`Serialization`**: export and file handling.
//!
//! A reading held back by decimation is *not* an error; see
//! [`Verdict::Hold`](crate::sampling::Verdict::Hold).

use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Why a serial connection could not be established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    /// The port did not answer within the open timeout.
    Timeout,
    /// No device exists at the given port identifier.
    PortNotFound,
    /// The OS refused access to the port.
    PermissionDenied,
    /// Anything else reported by the serial layer.
    Other,
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionFailure::Timeout => "timeout",
            ConnectionFailure::PortNotFound => "port not found",
            ConnectionFailure::PermissionDenied => "permission denied",
            ConnectionFailure::Other => "other",
        };
        f.write_str(label)
    }
}

/// Unmet condition reported by [`DaqError::Precondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The device link is not open.
    NotConnected,
    /// An acquisition loop is already active for this session.
    AlreadyPolling,
    /// Test metadata has not been filled in.
    MetadataIncomplete,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Precondition::NotConnected => "device is not connected",
            Precondition::AlreadyPolling => "acquisition is already running",
            Precondition::MetadataIncomplete => "test metadata is incomplete",
        };
        f.write_str(label)
    }
}

/// Primary error type for the acquisition core.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The serial transport could not be opened.
    #[error("Failed to connect to '{port}' ({kind}): {message}")]
    Connection {
        /// Port identifier passed to `connect`.
        port: String,
        /// Classified failure kind.
        kind: ConnectionFailure,
        /// Message from the serial layer.
        message: String,
    },

    /// A register read failed on an open (or expected-open) transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation invoked in the wrong state.
    #[error("Precondition failed: {0}")]
    Precondition(Precondition),

    /// Key is owned by the acquisition core and cannot be written through `set`.
    #[error("Session key '{0}' is read-only")]
    ReadOnlyKey(String),

    /// Value does not match the type stored under the key.
    #[error("Session key '{key}' expects {expected}")]
    TypeMismatch {
        /// Key being written.
        key: String,
        /// Human readable description of the expected value.
        expected: &'static str,
    },

    /// The acquisition task ended abnormally (panicked or was cancelled).
    #[error("Acquisition task failed: {0}")]
    TaskFailed(String),

    /// Test metadata exists but cannot be used for a derived figure.
    #[error("Invalid test metadata: {0}")]
    InvalidMetadata(String),

    /// Configuration could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer failure.
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON / TOML (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Functionality compiled out.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// Shorthand for a precondition failure.
    pub fn precondition(condition: Precondition) -> Self {
        DaqError::Precondition(condition)
    }

    /// True when the link was never established.
    pub fn is_connection(&self) -> bool {
        matches!(self, DaqError::Connection { .. })
    }

    /// True when the link was established and then failed mid-acquisition.
    pub fn is_transport(&self) -> bool {
        matches!(self, DaqError::Transport(_))
    }

    /// The unmet condition, if this is a precondition failure.
    pub fn precondition_kind(&self) -> Option<Precondition> {
        match self {
            DaqError::Precondition(condition) => Some(*condition),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DaqError {
    fn from(err: serde_json::Error) -> Self {
        DaqError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for DaqError {
    fn from(err: toml::de::Error) -> Self {
        DaqError::Serialization(err.to_string())
    }
}
