//! Modbus RTU over a local serial port.
//!
//! The port is opened with `tokio-serial` (8N1, no flow control) on a blocking
//! thread, then wrapped in a `tokio-modbus` RTU client context addressed to the
//! configured unit id. Each read is bounded by the configured read timeout.

use super::{RegisterTransport, SerialSettings, TransportConnector};
use crate::error::{AppResult, ConnectionFailure, DaqError};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio_modbus::client::{rtu, Client, Context, Reader};
use tokio_modbus::Slave;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, warn};

/// Opens [`ModbusRtuTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusRtuConnector;

#[async_trait]
impl TransportConnector for ModbusRtuConnector {
    async fn open(
        &self,
        port: &str,
        settings: &SerialSettings,
    ) -> AppResult<Box<dyn RegisterTransport>> {
        let stream = open_serial_async(port, settings.baud_rate).await?;
        let context = rtu::attach_slave(stream, Slave(settings.unit_id));
        debug!(port, unit = settings.unit_id, "modbus rtu context attached");

        Ok(Box::new(ModbusRtuTransport {
            port: port.to_string(),
            unit_id: settings.unit_id,
            read_timeout: settings.read_timeout,
            context,
        }))
    }
}

/// Open transport backed by a `tokio-modbus` client context.
pub struct ModbusRtuTransport {
    port: String,
    unit_id: u8,
    read_timeout: Duration,
    context: Context,
}

impl std::fmt::Debug for ModbusRtuTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusRtuTransport")
            .field("port", &self.port)
            .field("unit_id", &self.unit_id)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RegisterTransport for ModbusRtuTransport {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> AppResult<Vec<u16>> {
        let response = tokio::time::timeout(
            self.read_timeout,
            self.context.read_holding_registers(address, count),
        )
        .await
        .map_err(|_| {
            DaqError::Transport(format!(
                "no response from unit {} on {} within {:?}",
                self.unit_id, self.port, self.read_timeout
            ))
        })?;

        match response {
            Ok(Ok(words)) => Ok(words),
            Ok(Err(exception)) => Err(DaqError::Transport(format!(
                "unit {} rejected read of {} registers at {}: {:?}",
                self.unit_id, count, address, exception
            ))),
            Err(err) => Err(DaqError::Transport(format!(
                "modbus read on {} failed: {}",
                self.port, err
            ))),
        }
    }

    async fn close(&mut self) -> AppResult<()> {
        match self.context.disconnect().await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(port = %self.port, error = %err, "modbus disconnect reported an error");
                Ok(())
            }
        }
    }

    fn describe(&self) -> String {
        format!("modbus rtu unit {} on {}", self.unit_id, self.port)
    }
}

/// Open a serial port with 8N1 framing on a blocking thread.
async fn open_serial_async(port: &str, baud_rate: u32) -> AppResult<tokio_serial::SerialStream> {
    let path = port.to_string();
    let opened = tokio::task::spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|err| DaqError::Connection {
        port: port.to_string(),
        kind: ConnectionFailure::Other,
        message: format!("spawn_blocking for serial port opening failed: {}", err),
    })?;

    opened.map_err(|err| DaqError::Connection {
        port: port.to_string(),
        kind: classify(&err.kind),
        message: err.description,
    })
}

fn classify(kind: &serialport::ErrorKind) -> ConnectionFailure {
    match kind {
        serialport::ErrorKind::NoDevice => ConnectionFailure::PortNotFound,
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => ConnectionFailure::PortNotFound,
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            ConnectionFailure::PermissionDenied
        }
        serialport::ErrorKind::Io(io::ErrorKind::TimedOut) => ConnectionFailure::Timeout,
        _ => ConnectionFailure::Other,
    }
}

/// Serial ports visible to the OS, for operator selection.
pub fn available_ports() -> AppResult<Vec<String>> {
    let ports = serialport::available_ports().map_err(|err| DaqError::Connection {
        port: String::new(),
        kind: classify(&err.kind),
        message: err.description,
    })?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
