//! Serial link to the force transducer.
//!
//! [`DeviceLink`] owns the connection lifecycle and publishes `isConnected`
//! to the session store. The wire protocol sits behind two seams:
//!
//! - [`TransportConnector`] opens a port and hands back a transport
//! - [`RegisterTransport`] reads holding registers and closes
//!
//! Implementations:
//!
//! | Connector | Transport | Use |
//! |-----------|-----------|-----|
//! | [`modbus_rtu::ModbusRtuConnector`] | Modbus RTU over `tokio-serial` | real rig (`instrument_serial`) |
//! | [`simulated::SimulatedConnector`] | ramp-and-hold load cell | bench demos |
//! | [`scripted::ScriptedConnector`] | queued register pairs | tests |
//!
//! Connection failures are never retried here.

#[cfg(feature = "instrument_serial")]
pub mod modbus_rtu;
pub mod scripted;
pub mod simulated;

use crate::config::RigConfig;
use crate::error::{AppResult, DaqError, Precondition};
use crate::sample::{RegisterPair, FORCE_REGISTER_ADDRESS, FORCE_REGISTER_COUNT};
use crate::session::SharedSession;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Shared handle to the device link.
pub type SharedDevice = Arc<tokio::sync::Mutex<DeviceLink>>;

/// Serial line settings. Framing is always 8 data bits, no parity, 1 stop bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Modbus unit (slave) id
    pub unit_id: u8,
    /// Per-read timeout
    pub read_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            unit_id: 0,
            read_timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialSettings {
    /// Settings from the `[device]` section.
    pub fn from_config(config: &RigConfig) -> Self {
        Self {
            baud_rate: config.device.baud_rate,
            unit_id: config.device.unit_id,
            read_timeout: config.read_timeout(),
        }
    }
}

// =============================================================================
// Transport seams
// =============================================================================

/// An open register-oriented transport.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Read `count` consecutive 16-bit holding registers starting at `address`.
    ///
    /// Failures are reported as [`DaqError::Transport`].
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> AppResult<Vec<u16>>;

    /// Release the underlying port.
    async fn close(&mut self) -> AppResult<()>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Opens transports.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open `port` with `settings`.
    ///
    /// Failures are reported as [`DaqError::Connection`].
    async fn open(
        &self,
        port: &str,
        settings: &SerialSettings,
    ) -> AppResult<Box<dyn RegisterTransport>>;
}

// =============================================================================
// DeviceLink
// =============================================================================

/// Connection lifecycle for the force transducer.
pub struct DeviceLink {
    connector: Arc<dyn TransportConnector>,
    session: SharedSession,
    transport: Option<Box<dyn RegisterTransport>>,
    port: Option<String>,
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("port", &self.port)
            .field("open", &self.transport.is_some())
            .finish()
    }
}

impl DeviceLink {
    /// Create a closed link publishing to `session`.
    pub fn new(connector: Arc<dyn TransportConnector>, session: SharedSession) -> Self {
        Self {
            connector,
            session,
            transport: None,
            port: None,
        }
    }

    /// Wrap in the shared handle used by the acquisition loop.
    pub fn into_shared(self) -> SharedDevice {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// True while a transport is open.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Port of the open transport.
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// Open the serial connection.
    ///
    /// Returns immediately if already open, without reopening. On failure the
    /// link stays closed and `isConnected` stays false.
    #[instrument(skip(self, settings), fields(baud = settings.baud_rate, unit = settings.unit_id))]
    pub async fn connect(&mut self, port: &str, settings: &SerialSettings) -> AppResult<()> {
        if self.transport.is_some() {
            debug!(open_port = ?self.port, "already connected");
            return Ok(());
        }

        match self.connector.open(port, settings).await {
            Ok(transport) => {
                info!(transport = %transport.describe(), "device connected");
                self.transport = Some(transport);
                self.port = Some(port.to_string());
                self.session.lock().set_connected(true);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "device connection failed");
                Err(err)
            }
        }
    }

    /// Read the force register pair (address 0, two registers).
    pub async fn read_force_registers(&mut self) -> AppResult<RegisterPair> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| DaqError::Transport("transport is not open".to_string()))?;

        let words = transport
            .read_holding_registers(FORCE_REGISTER_ADDRESS, FORCE_REGISTER_COUNT)
            .await?;

        match words.as_slice() {
            [high, low] => Ok(RegisterPair::new(*high, *low)),
            other => Err(DaqError::Transport(format!(
                "expected {} registers, device returned {}",
                FORCE_REGISTER_COUNT,
                other.len()
            ))),
        }
    }

    /// Close the connection. Safe to call when already closed.
    ///
    /// # Errors
    ///
    /// [`Precondition::AlreadyPolling`] while an acquisition loop is running on
    /// this session; stop it first. The link stays open.
    pub async fn close(&mut self) -> AppResult<()> {
        if self.transport.is_none() {
            return Ok(());
        }
        if self.session.lock().is_polling() {
            return Err(DaqError::precondition(Precondition::AlreadyPolling));
        }
        let Some(mut transport) = self.transport.take() else {
            return Ok(());
        };
        let port = self.port.take();

        if let Err(err) = transport.close().await {
            warn!(?port, error = %err, "error while closing transport");
        }
        info!(?port, "device disconnected");
        self.session.lock().set_connected(false);
        Ok(())
    }
}
