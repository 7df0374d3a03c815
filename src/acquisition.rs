//! Fixed-cadence acquisition loop.
//!
//! One iteration reads the force registers, converts them, runs the reading
//! through the session's decimation policy and, if accepted, records it. The
//! next iteration is scheduled `cadence` after the previous one completes, so
//! iterations never overlap and a slow read stretches the period rather than
//! queueing reads behind it.
//!
//! ```text
//!            start()              stop()
//!   Idle ───────────────▶ Running ─────────▶ Idle
//!    ▲                       │
//!    │                       │ transport error
//!    │      start()          ▼
//!    └──────────────────── Faulted
//! ```
//!
//! A held reading ([`IterationOutcome::Held`]) is a normal outcome and keeps
//! the loop running; only a transport error moves it to `Faulted`.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut acquisition = AcquisitionLoop::new(device, session, Arc::new(RequiredFields));
//! acquisition.start()?;
//! tokio::time::sleep(Duration::from_secs(30)).await;
//! acquisition.stop().await?;
//! ```

use crate::config::RigConfig;
use crate::device::SharedDevice;
use crate::error::{AppResult, DaqError, Precondition};
use crate::metadata::MetadataValidator;
use crate::sample::Sample;
use crate::sampling::{AcceptReason, Verdict};
use crate::session::SharedSession;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, trace, warn};

/// Default delay between iterations.
pub const DEFAULT_CADENCE: Duration = Duration::from_millis(1000);

const OUTCOME_CHANNEL_CAPACITY: usize = 64;

/// Acquisition state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// Not scheduled
    Idle,
    /// Worker task active
    Running,
    /// Stopped by a transport error
    Faulted,
}

/// Result of one successful iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    /// Sample recorded in the session
    Accepted {
        /// The recorded sample
        sample: Sample,
        /// Which acceptance clause fired
        reason: AcceptReason,
    },
    /// Sample dropped by decimation
    Held {
        /// The dropped sample
        sample: Sample,
        /// Load change since the last accepted sample
        delta_tons: f64,
    },
}

impl IterationOutcome {
    /// The reading, accepted or not.
    pub fn sample(&self) -> &Sample {
        match self {
            IterationOutcome::Accepted { sample, .. } | IterationOutcome::Held { sample, .. } => {
                sample
            }
        }
    }
}

/// Wall-clock timestamps advanced by the runtime's monotonic clock.
///
/// Anchored on the first `start()` and reused by every later run of the same
/// loop, so timestamps never go backwards across a stop/start.
#[derive(Debug, Clone, Copy)]
struct Timebase {
    wall: DateTime<Utc>,
    mono: Instant,
}

impl Timebase {
    fn anchor() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.mono.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + elapsed
    }
}

struct Worker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<AppResult<()>>,
}

/// Polling engine bound to one device link and one session.
pub struct AcquisitionLoop {
    device: SharedDevice,
    session: SharedSession,
    validator: Arc<dyn MetadataValidator>,
    cadence: Duration,
    phase_tx: watch::Sender<LoopPhase>,
    outcome_tx: broadcast::Sender<IterationOutcome>,
    timebase: Option<Timebase>,
    worker: Option<Worker>,
}

impl std::fmt::Debug for AcquisitionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionLoop")
            .field("cadence", &self.cadence)
            .field("phase", &self.phase())
            .field("worker", &self.worker.is_some())
            .finish()
    }
}

impl AcquisitionLoop {
    /// Create an idle loop with the default cadence.
    pub fn new(
        device: SharedDevice,
        session: SharedSession,
        validator: Arc<dyn MetadataValidator>,
    ) -> Self {
        let (phase_tx, _) = watch::channel(LoopPhase::Idle);
        let (outcome_tx, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        Self {
            device,
            session,
            validator,
            cadence: DEFAULT_CADENCE,
            phase_tx,
            outcome_tx,
            timebase: None,
            worker: None,
        }
    }

    /// Create an idle loop using the configured cadence.
    pub fn from_config(
        config: &RigConfig,
        device: SharedDevice,
        session: SharedSession,
        validator: Arc<dyn MetadataValidator>,
    ) -> Self {
        Self::new(device, session, validator).with_cadence(config.poll_interval())
    }

    /// Override the delay between iterations.
    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    /// Delay between iterations.
    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Current state.
    pub fn phase(&self) -> LoopPhase {
        *self.phase_tx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<LoopPhase> {
        self.phase_tx.subscribe()
    }

    /// Every successful iteration, including held readings.
    ///
    /// Intended for live readouts; slow receivers lag and miss outcomes.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<IterationOutcome> {
        self.outcome_tx.subscribe()
    }

    fn worker_alive(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Begin polling. The first iteration runs immediately.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`DaqError::Precondition`] naming the first unmet condition, checked in
    /// order: connected, not already polling, metadata complete. Nothing
    /// changes on error.
    pub fn start(&mut self) -> AppResult<()> {
        {
            let mut session = self.session.lock();
            if !session.is_connected() {
                return Err(DaqError::precondition(Precondition::NotConnected));
            }
            if session.is_polling() || self.worker_alive() {
                return Err(DaqError::precondition(Precondition::AlreadyPolling));
            }
            if !self
                .validator
                .is_session_metadata_complete(session.test_metadata())
            {
                return Err(DaqError::precondition(Precondition::MetadataIncomplete));
            }
            session.set_polling(true);
        }

        // any finished worker left over from a faulted run is replaced below;
        // its error was already logged
        let (stop_tx, stop_rx) = watch::channel(false);
        self.phase_tx.send_replace(LoopPhase::Running);
        info!(cadence = ?self.cadence, "acquisition started");

        let timebase = *self.timebase.get_or_insert_with(Timebase::anchor);
        let handle = tokio::spawn(run(
            Arc::clone(&self.device),
            Arc::clone(&self.session),
            timebase,
            self.cadence,
            stop_rx,
            self.outcome_tx.clone(),
            self.phase_tx.clone(),
        ));
        self.worker = Some(Worker { stop_tx, handle });
        Ok(())
    }

    /// Stop polling and wait for the in-flight iteration to finish.
    ///
    /// Idempotent. If the loop had already faulted and the error was not yet
    /// collected, it is returned here.
    pub async fn stop(&mut self) -> AppResult<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let _ = worker.stop_tx.send(true);
        self.join(worker.handle).await
    }

    /// Wait for the loop to end on its own (fault) or via another `stop`.
    ///
    /// Returns immediately when idle. Cancel-safe: dropping the future leaves
    /// the loop running and still owned by `self`.
    pub async fn wait(&mut self) -> AppResult<()> {
        let Some(worker) = self.worker.as_mut() else {
            return Ok(());
        };
        let joined = (&mut worker.handle).await;
        self.worker = None;
        self.finish(joined)
    }

    /// Stop polling, then close the device link.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        let stopped = self.stop().await;
        self.device.lock().await.close().await?;
        stopped
    }

    async fn join(&mut self, handle: JoinHandle<AppResult<()>>) -> AppResult<()> {
        let joined = handle.await;
        self.finish(joined)
    }

    fn finish(
        &mut self,
        joined: Result<AppResult<()>, tokio::task::JoinError>,
    ) -> AppResult<()> {
        match joined {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "acquisition task ended abnormally");
                self.session.lock().set_polling(false);
                self.phase_tx.send_replace(LoopPhase::Faulted);
                Err(DaqError::TaskFailed(err.to_string()))
            }
        }
    }
}

/// Read, convert, decimate and record one reading.
///
/// The session lock is only taken after the read completes.
pub(crate) async fn poll_once(
    device: &SharedDevice,
    session: &SharedSession,
    timestamp: DateTime<Utc>,
) -> AppResult<IterationOutcome> {
    let registers = device.lock().await.read_force_registers().await?;
    let sample = Sample::from_registers(registers, timestamp);
    let verdict = session.lock().ingest(sample.clone());

    Ok(match verdict {
        Verdict::Accept { reason, .. } => IterationOutcome::Accepted { sample, reason },
        Verdict::Hold {
            delta_tons,
            elapsed,
        } => {
            trace!(
                load_tons = sample.load_tons(),
                delta_tons,
                ?elapsed,
                "reading held"
            );
            IterationOutcome::Held { sample, delta_tons }
        }
    })
}

async fn run(
    device: SharedDevice,
    session: SharedSession,
    timebase: Timebase,
    cadence: Duration,
    mut stop_rx: watch::Receiver<bool>,
    outcome_tx: broadcast::Sender<IterationOutcome>,
    phase_tx: watch::Sender<LoopPhase>,
) -> AppResult<()> {
    let result = loop {
        if *stop_rx.borrow() {
            break Ok(());
        }

        match poll_once(&device, &session, timebase.now()).await {
            Ok(outcome) => {
                let _ = outcome_tx.send(outcome);
            }
            Err(err) => break Err(err),
        }

        tokio::select! {
            _ = tokio::time::sleep(cadence) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    // owner dropped without stopping
                    break Ok(());
                }
            }
        }
    };

    session.lock().set_polling(false);
    match &result {
        Ok(()) => {
            phase_tx.send_replace(LoopPhase::Idle);
            info!("acquisition stopped");
        }
        Err(err) => {
            phase_tx.send_replace(LoopPhase::Faulted);
            if err.is_transport() {
                error!(error = %err, "acquisition faulted");
            } else {
                warn!(error = %err, "acquisition ended with error");
            }
        }
    }
    result
}
