//! Register-to-physical-unit conversion.
//!
//! The transducer reports load as a 32-bit unsigned count split across two
//! holding registers, in units of [`SCALE_FACTOR_KG`] kilograms:
//!
//! ```text
//! combined = (high << 16) | low
//! load_kg  = combined * 10
//! load_t   = load_kg / 1000
//! load_kN  = load_kg * 9.80665 / 1000
//! ```
//!
//! A [`Sample`] can only be built from a register pair, so the derived units
//! can never drift from the raw reading. Deserialization goes through the raw
//! registers as well.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kilograms per device count.
pub const SCALE_FACTOR_KG: f64 = 10.0;

/// Standard gravity used for the kN conversion (m/s²).
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// First holding register of the force reading.
pub const FORCE_REGISTER_ADDRESS: u16 = 0;

/// Number of holding registers making up the force reading.
pub const FORCE_REGISTER_COUNT: u16 = 2;

/// Raw holding register pair as returned by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPair {
    /// Most significant word
    pub high: u16,
    /// Least significant word
    pub low: u16,
}

impl RegisterPair {
    /// Create a register pair.
    pub fn new(high: u16, low: u16) -> Self {
        Self { high, low }
    }

    /// Split a 32-bit count into high and low words.
    pub fn from_combined(combined: u32) -> Self {
        Self {
            high: (combined >> 16) as u16,
            low: (combined & 0xFFFF) as u16,
        }
    }

    /// Build the register pair a device would report for `kg`, rounding to the
    /// nearest count. Negative loads saturate at zero.
    pub fn from_kg(kg: f64) -> Self {
        let counts = (kg / SCALE_FACTOR_KG).round().clamp(0.0, u32::MAX as f64) as u32;
        Self::from_combined(counts)
    }

    /// `(high << 16) | low`
    pub fn combined(self) -> u32 {
        (u32::from(self.high) << 16) | u32::from(self.low)
    }

    /// Load in kilograms.
    pub fn load_kg(self) -> f64 {
        f64::from(self.combined()) * SCALE_FACTOR_KG
    }
}

/// One converted force reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSample")]
pub struct Sample {
    timestamp: DateTime<Utc>,
    raw_high: u16,
    raw_low: u16,
    load_kg: f64,
    load_tons: f64,
    load_kn: f64,
}

#[derive(Deserialize)]
struct RawSample {
    timestamp: DateTime<Utc>,
    raw_high: u16,
    raw_low: u16,
}

impl From<RawSample> for Sample {
    fn from(raw: RawSample) -> Self {
        Sample::from_registers(RegisterPair::new(raw.raw_high, raw.raw_low), raw.timestamp)
    }
}

impl Sample {
    /// Convert a register pair read at `timestamp`.
    pub fn from_registers(registers: RegisterPair, timestamp: DateTime<Utc>) -> Self {
        let load_kg = registers.load_kg();
        Self {
            timestamp,
            raw_high: registers.high,
            raw_low: registers.low,
            load_kg,
            load_tons: load_kg / 1000.0,
            load_kn: load_kg * STANDARD_GRAVITY / 1000.0,
        }
    }

    /// Wall-clock time of the read.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The raw registers this sample was converted from.
    pub fn registers(&self) -> RegisterPair {
        RegisterPair::new(self.raw_high, self.raw_low)
    }

    /// High register word.
    pub fn raw_high(&self) -> u16 {
        self.raw_high
    }

    /// Low register word.
    pub fn raw_low(&self) -> u16 {
        self.raw_low
    }

    /// Load in kilograms.
    pub fn load_kg(&self) -> f64 {
        self.load_kg
    }

    /// Load in metric tons.
    pub fn load_tons(&self) -> f64 {
        self.load_tons
    }

    /// Load in kilonewtons.
    pub fn load_kn(&self) -> f64 {
        self.load_kn
    }
}
