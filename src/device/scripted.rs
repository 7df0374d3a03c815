//! Deterministic transport for tests.
//!
//! Readings are queued up front (or pushed while a loop is running) and
//! returned in order; once the queue is empty the last register pair repeats,
//! which models a steady load. The connector counts opens, reads and closes so
//! tests can assert on link behaviour.
//!
//! ```rust,ignore
//! let connector = ScriptedConnector::with_readings([
//!     RegisterPair::new(0, 500),
//!     RegisterPair::new(0, 501),
//! ]);
//! connector.push_failure("cable pulled");
//! ```

use super::{RegisterTransport, SerialSettings, TransportConnector};
use crate::error::{AppResult, ConnectionFailure, DaqError};
use crate::sample::RegisterPair;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// One scripted response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedRead {
    /// Return this register pair
    Registers(RegisterPair),
    /// Fail the read with a transport error
    Fail(String),
    /// Return a single register instead of two
    Short,
}

#[derive(Debug, Default)]
struct Script {
    queue: VecDeque<ScriptedRead>,
    last: Option<RegisterPair>,
    connect_failure: Option<ConnectionFailure>,
    opens: usize,
    reads: usize,
    closes: usize,
}

/// Connector handing out transports that share one script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnector {
    /// Empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script pre-loaded with `readings`.
    pub fn with_readings<I>(readings: I) -> Self
    where
        I: IntoIterator<Item = RegisterPair>,
    {
        let connector = Self::new();
        for registers in readings {
            connector.push(registers);
        }
        connector
    }

    /// Queue a register pair.
    pub fn push(&self, registers: RegisterPair) {
        self.script
            .lock()
            .queue
            .push_back(ScriptedRead::Registers(registers));
    }

    /// Queue a failing read.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .queue
            .push_back(ScriptedRead::Fail(message.into()));
    }

    /// Queue a response with the wrong register count.
    pub fn push_short_response(&self) {
        self.script.lock().queue.push_back(ScriptedRead::Short);
    }

    /// Make every subsequent `open` fail with `kind`.
    pub fn fail_connect(&self, kind: ConnectionFailure) {
        self.script.lock().connect_failure = Some(kind);
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.script.lock().opens
    }

    /// Number of reads attempted.
    pub fn read_count(&self) -> usize {
        self.script.lock().reads
    }

    /// Number of closes.
    pub fn close_count(&self) -> usize {
        self.script.lock().closes
    }
}

#[async_trait]
impl TransportConnector for ScriptedConnector {
    async fn open(
        &self,
        port: &str,
        _settings: &SerialSettings,
    ) -> AppResult<Box<dyn RegisterTransport>> {
        let mut script = self.script.lock();
        if let Some(kind) = script.connect_failure {
            return Err(DaqError::Connection {
                port: port.to_string(),
                kind,
                message: "scripted connection failure".to_string(),
            });
        }
        script.opens += 1;
        Ok(Box::new(ScriptedTransport {
            port: port.to_string(),
            script: Arc::clone(&self.script),
        }))
    }
}

/// Transport reading from a [`ScriptedConnector`]'s queue.
#[derive(Debug)]
pub struct ScriptedTransport {
    port: String,
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl RegisterTransport for ScriptedTransport {
    async fn read_holding_registers(&mut self, _address: u16, _count: u16) -> AppResult<Vec<u16>> {
        let mut script = self.script.lock();
        script.reads += 1;
        let next = match script.queue.pop_front() {
            Some(read) => read,
            None => match script.last {
                Some(registers) => ScriptedRead::Registers(registers),
                None => ScriptedRead::Fail("script exhausted".to_string()),
            },
        };

        match next {
            ScriptedRead::Registers(registers) => {
                script.last = Some(registers);
                Ok(vec![registers.high, registers.low])
            }
            ScriptedRead::Fail(message) => Err(DaqError::Transport(message)),
            ScriptedRead::Short => Ok(vec![0]),
        }
    }

    async fn close(&mut self) -> AppResult<()> {
        self.script.lock().closes += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("scripted transport on {}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repeats_last_reading_when_queue_drains() {
        let connector = ScriptedConnector::with_readings([RegisterPair::new(0, 7)]);
        let mut transport = connector
            .open("sim", &SerialSettings::default())
            .await
            .unwrap();

        assert_eq!(transport.read_holding_registers(0, 2).await.unwrap(), vec![0, 7]);
        assert_eq!(transport.read_holding_registers(0, 2).await.unwrap(), vec![0, 7]);
        assert_eq!(connector.read_count(), 2);
    }

    #[tokio::test]
    async fn empty_script_fails() {
        let connector = ScriptedConnector::new();
        let mut transport = connector
            .open("sim", &SerialSettings::default())
            .await
            .unwrap();
        assert!(transport
            .read_holding_registers(0, 2)
            .await
            .unwrap_err()
            .is_transport());
    }
}
