//! # Load-Test Rig Acquisition Core
//!
//! This crate samples a force transducer over Modbus RTU, converts raw
//! register values to kilograms, tons and kilonewtons, decimates the stream,
//! tracks the running peak and keeps one consistent view of the test session
//! for chart, table and report consumers.
//!
//! ## Crate Structure
//!
//! - **`device`**: `DeviceLink` and the transport seams (Modbus RTU, simulated
//!   load cell, scripted test transport).
//! - **`sample`**: the register/unit conversion contract.
//! - **`sampling`**: hold-and-threshold decimation with peak tracking.
//! - **`session`**: `SessionStateStore`, the shared state aggregate with
//!   synchronous change notification.
//! - **`acquisition`**: the fixed-cadence polling loop and its state machine.
//! - **`metadata`**: calibration and equipment records and the completeness
//!   check gating acquisition.
//! - **`export`**: CSV history and JSON summary.
//! - **`config`** / **`logging`**: figment configuration and tracing setup.
//! - **`error`**: the `DaqError` enum.
//!
//! ## Wiring
//!
//! ```rust,ignore
//! let config = RigConfig::load()?;
//! let session = SessionStateStore::from_config(&config).into_shared();
//! let device = DeviceLink::new(Arc::new(ModbusRtuConnector), session.clone()).into_shared();
//! device
//!     .lock()
//!     .await
//!     .connect(&config.device.port, &SerialSettings::from_config(&config))
//!     .await?;
//!
//! let mut acquisition =
//!     AcquisitionLoop::from_config(&config, device, session.clone(), Arc::new(RequiredFields));
//! acquisition.start()?;
//! ```

pub mod acquisition;
pub mod config;
pub mod device;
pub mod error;
pub mod export;
pub mod logging;
pub mod metadata;
pub mod sample;
pub mod sampling;
pub mod session;

pub use acquisition::{AcquisitionLoop, IterationOutcome, LoopPhase};
pub use config::RigConfig;
pub use device::{DeviceLink, SerialSettings, SharedDevice};
pub use error::{AppResult, DaqError, Precondition};
pub use metadata::{MetadataValidator, RequiredFields, TestMetadata};
pub use sample::{RegisterPair, Sample};
pub use sampling::{SamplingPolicy, Verdict};
pub use session::{SessionStateStore, SharedSession, StateKey, StateValue};
