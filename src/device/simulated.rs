//! Simulated load cell for running the rig without hardware.
//!
//! Each read applies a random increment between `min_step_kg` and
//! `max_step_kg` until `max_load_kg` is reached, then holds. The load is
//! encoded exactly as the transducer does: `round(kg / 10)` split across
//! holding registers 0 (high word) and 1 (low word).
//!
//! Setting `fail_after_reads` makes every read after the first N fail with a
//! transport error, which is useful for exercising the `Faulted` path.

use super::{RegisterTransport, SerialSettings, TransportConnector};
use crate::config::SimulatorConfig;
use crate::error::{AppResult, DaqError};
use crate::sample::RegisterPair;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

/// Number of holding registers the simulated device exposes.
const REGISTER_MAP_LEN: u16 = 2;

/// Connector producing [`SimulatedLoadCell`] transports.
#[derive(Debug, Clone, Default)]
pub struct SimulatedConnector {
    config: SimulatorConfig,
}

impl SimulatedConnector {
    /// Create a connector with the given ramp parameters.
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportConnector for SimulatedConnector {
    async fn open(
        &self,
        port: &str,
        settings: &SerialSettings,
    ) -> AppResult<Box<dyn RegisterTransport>> {
        debug!(port, unit = settings.unit_id, "opening simulated load cell");
        Ok(Box::new(SimulatedLoadCell::new(port, self.config.clone())))
    }
}

/// Ramp-and-hold load cell.
#[derive(Debug)]
pub struct SimulatedLoadCell {
    port: String,
    config: SimulatorConfig,
    rng: StdRng,
    load_kg: f64,
    reads: u64,
}

impl SimulatedLoadCell {
    /// Start at zero load.
    pub fn new(port: &str, config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            port: port.to_string(),
            config,
            rng,
            load_kg: 0.0,
            reads: 0,
        }
    }

    /// Current simulated load.
    pub fn load_kg(&self) -> f64 {
        self.load_kg
    }

    fn advance(&mut self) {
        if self.load_kg < self.config.max_load_kg {
            let step = self
                .rng
                .gen_range(self.config.min_step_kg..=self.config.max_step_kg);
            self.load_kg = (self.load_kg + step).min(self.config.max_load_kg);
        }
    }
}

#[async_trait]
impl RegisterTransport for SimulatedLoadCell {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> AppResult<Vec<u16>> {
        if let Some(limit) = self.config.fail_after_reads {
            if self.reads >= limit {
                return Err(DaqError::Transport(format!(
                    "simulated device stopped responding after {} reads",
                    limit
                )));
            }
        }
        let end = address.checked_add(count).unwrap_or(u16::MAX);
        if count == 0 || end > REGISTER_MAP_LEN {
            return Err(DaqError::Transport(format!(
                "illegal data address: {} registers at {}",
                count, address
            )));
        }

        self.reads += 1;
        self.advance();
        let registers = RegisterPair::from_kg(self.load_kg);
        trace!(load_kg = self.load_kg, ?registers, "simulated read");

        let map = [registers.high, registers.low];
        Ok(map[usize::from(address)..usize::from(end)].to_vec())
    }

    async fn close(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        format!("simulated load cell on {}", self.port)
    }
}
