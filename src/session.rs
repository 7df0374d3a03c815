//! Session state store with synchronous change notification.
//!
//! `SessionStateStore` is the single source of truth for one test session:
//! accepted samples, running peak, polling and connection flags, and the test
//! metadata. Chart, table and report consumers read from it and subscribe to
//! changes; only the device link, the acquisition loop and
//! [`SessionStateStore::clear_data`] write the acquisition-owned keys.
//!
//! The store has no interior locking. It is shared as [`SharedSession`] and
//! every mutation happens under that one lock, which must never be held
//! across an `.await`. Listeners run while the lock is held, in registration
//! order, before the mutating call returns; a listener must not try to lock
//! the session again.
//!
//! # Example
//!
//! ```rust,ignore
//! let session = SessionStateStore::default().into_shared();
//! session.lock().subscribe(|key, value| {
//!     if *key == StateKey::PeakValue {
//!         println!("new peak: {:?}", value.as_number());
//!     }
//! });
//! ```

use crate::config::RigConfig;
use crate::error::{AppResult, DaqError, Precondition};
use crate::metadata::TestMetadata;
use crate::sample::{Sample, STANDARD_GRAVITY};
use crate::sampling::{SamplingPolicy, Verdict};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared handle to the session store.
pub type SharedSession = Arc<Mutex<SessionStateStore>>;

// =============================================================================
// Keys and values
// =============================================================================

/// Addressable entries of the session state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StateKey {
    /// Accepted samples in time order
    Samples,
    /// Maximum accepted load (tons)
    PeakValue,
    /// Most recently accepted sample
    LastAcceptedSample,
    /// Timestamp of the most recently accepted sample
    LastAcceptedAt,
    /// Acquisition loop is scheduled
    IsPolling,
    /// Device link is open
    IsConnected,
    /// Calibration and equipment records
    TestMetadata,
    /// Collaborator-defined key outside the schema
    Custom(String),
}

impl StateKey {
    /// Wire name of the key.
    pub fn as_str(&self) -> &str {
        match self {
            StateKey::Samples => "samples",
            StateKey::PeakValue => "peakValue",
            StateKey::LastAcceptedSample => "lastAcceptedSample",
            StateKey::LastAcceptedAt => "lastAcceptedAt",
            StateKey::IsPolling => "isPolling",
            StateKey::IsConnected => "isConnected",
            StateKey::TestMetadata => "testMetadata",
            StateKey::Custom(name) => name,
        }
    }

    /// Keys written only by the acquisition core.
    pub fn is_core_owned(&self) -> bool {
        !matches!(self, StateKey::TestMetadata | StateKey::Custom(_))
    }
}

impl From<&str> for StateKey {
    fn from(name: &str) -> Self {
        match name {
            "samples" => StateKey::Samples,
            "peakValue" => StateKey::PeakValue,
            "lastAcceptedSample" => StateKey::LastAcceptedSample,
            "lastAcceptedAt" => StateKey::LastAcceptedAt,
            "isPolling" => StateKey::IsPolling,
            "isConnected" => StateKey::IsConnected,
            "testMetadata" => StateKey::TestMetadata,
            other => StateKey::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value stored under a [`StateKey`].
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    /// Sample history, shared with the store
    Samples(Arc<Vec<Sample>>),
    /// Scalar
    Number(f64),
    /// Optional sample
    Sample(Option<Sample>),
    /// Optional timestamp
    Timestamp(Option<DateTime<Utc>>),
    /// Boolean flag
    Flag(bool),
    /// Test metadata
    Metadata(TestMetadata),
    /// Free-form value for collaborator keys
    Json(serde_json::Value),
}

impl StateValue {
    /// Scalar payload, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            StateValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Flag payload, if any.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            StateValue::Flag(v) => Some(*v),
            _ => None,
        }
    }

    /// Sample history payload, if any.
    pub fn as_samples(&self) -> Option<&[Sample]> {
        match self {
            StateValue::Samples(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Sample payload, if any.
    pub fn as_sample(&self) -> Option<&Sample> {
        match self {
            StateValue::Sample(v) => v.as_ref(),
            _ => None,
        }
    }
}

/// One change, as delivered through [`SessionStateStore::subscribe_channel`].
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    /// Changed key
    pub key: StateKey,
    /// New value
    pub value: StateValue,
}

/// Handle returned by [`SessionStateStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&StateKey, &StateValue) + Send>;

// =============================================================================
// Summary
// =============================================================================

/// Point-in-time digest of a session, for reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Session identifier
    pub session_id: Uuid,
    /// When the store was created
    pub created_at: DateTime<Utc>,
    /// Number of accepted samples
    pub sample_count: usize,
    /// Peak load (tons)
    pub peak_tons: f64,
    /// Peak load (kN)
    pub peak_kn: f64,
    /// First accepted sample time
    pub first_sample_at: Option<DateTime<Utc>>,
    /// Last accepted sample time
    pub last_sample_at: Option<DateTime<Utc>>,
    /// Proof load from the equipment record, when it can be computed
    pub proof_load_tons: Option<f64>,
    /// Test metadata at the time of the summary
    pub metadata: TestMetadata,
}

// =============================================================================
// Store
// =============================================================================

/// Mutable session state plus its subscriber list.
pub struct SessionStateStore {
    session_id: Uuid,
    created_at: DateTime<Utc>,
    samples: Arc<Vec<Sample>>,
    peak_value: f64,
    last_accepted_sample: Option<Sample>,
    last_accepted_at: Option<DateTime<Utc>>,
    is_polling: bool,
    is_connected: bool,
    test_metadata: TestMetadata,
    extras: HashMap<String, StateValue>,
    policy: SamplingPolicy,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: u64,
}

impl Default for SessionStateStore {
    fn default() -> Self {
        Self::new(SamplingPolicy::default())
    }
}

impl fmt::Debug for SessionStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStateStore")
            .field("session_id", &self.session_id)
            .field("samples", &self.samples.len())
            .field("peak_value", &self.peak_value)
            .field("is_polling", &self.is_polling)
            .field("is_connected", &self.is_connected)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl SessionStateStore {
    /// Empty session decimated by `policy`.
    pub fn new(policy: SamplingPolicy) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            created_at: Utc::now(),
            samples: Arc::new(Vec::new()),
            peak_value: 0.0,
            last_accepted_sample: None,
            last_accepted_at: None,
            is_polling: false,
            is_connected: false,
            test_metadata: TestMetadata::default(),
            extras: HashMap::new(),
            policy,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    /// Empty session using the configured thresholds.
    pub fn from_config(config: &RigConfig) -> Self {
        Self::new(SamplingPolicy::new(
            config.acquisition.hold_threshold_tons,
            config.heartbeat(),
        ))
    }

    /// Wrap in the shared handle used by the device link and acquisition loop.
    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Session identifier.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Accepted samples in time order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Peak accepted load in tons, 0 when empty.
    pub fn peak_value(&self) -> f64 {
        self.peak_value
    }

    /// Most recently accepted sample.
    pub fn last_accepted_sample(&self) -> Option<&Sample> {
        self.last_accepted_sample.as_ref()
    }

    /// Time of the most recently accepted sample.
    pub fn last_accepted_at(&self) -> Option<DateTime<Utc>> {
        self.last_accepted_at
    }

    /// True while the acquisition loop is scheduled.
    pub fn is_polling(&self) -> bool {
        self.is_polling
    }

    /// True while the device link is open.
    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    /// Calibration and equipment records.
    pub fn test_metadata(&self) -> &TestMetadata {
        &self.test_metadata
    }

    /// Decimation policy and its bookkeeping.
    pub fn policy(&self) -> &SamplingPolicy {
        &self.policy
    }

    /// Snapshot of the value under `key`. `None` only for unset collaborator keys.
    pub fn get(&self, key: &StateKey) -> Option<StateValue> {
        let value = match key {
            StateKey::Samples => StateValue::Samples(Arc::clone(&self.samples)),
            StateKey::PeakValue => StateValue::Number(self.peak_value),
            StateKey::LastAcceptedSample => StateValue::Sample(self.last_accepted_sample.clone()),
            StateKey::LastAcceptedAt => StateValue::Timestamp(self.last_accepted_at),
            StateKey::IsPolling => StateValue::Flag(self.is_polling),
            StateKey::IsConnected => StateValue::Flag(self.is_connected),
            StateKey::TestMetadata => StateValue::Metadata(self.test_metadata.clone()),
            StateKey::Custom(name) => return self.extras.get(name).cloned(),
        };
        Some(value)
    }

    // -------------------------------------------------------------------------
    // Collaborator writes
    // -------------------------------------------------------------------------

    /// Write a collaborator-owned key and notify subscribers.
    ///
    /// Unknown keys are stored with a warning. Acquisition-owned keys are
    /// rejected with [`DaqError::ReadOnlyKey`].
    pub fn set(&mut self, key: impl Into<StateKey>, value: StateValue) -> AppResult<()> {
        let key = key.into();
        match &key {
            k if k.is_core_owned() => return Err(DaqError::ReadOnlyKey(k.to_string())),
            StateKey::TestMetadata => match &value {
                StateValue::Metadata(metadata) => self.test_metadata = metadata.clone(),
                _ => {
                    return Err(DaqError::TypeMismatch {
                        key: key.to_string(),
                        expected: "test metadata",
                    })
                }
            },
            StateKey::Custom(name) => {
                warn!(key = %name, "setting unknown session key");
                self.extras.insert(name.clone(), value.clone());
            }
            _ => {}
        }
        self.notify(&key, &value);
        Ok(())
    }

    /// Replace the test metadata.
    pub fn set_test_metadata(&mut self, metadata: TestMetadata) {
        self.test_metadata = metadata;
        let value = StateValue::Metadata(self.test_metadata.clone());
        self.notify(&StateKey::TestMetadata, &value);
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Register a listener called on every change, after earlier listeners.
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&StateKey, &StateValue) + Send + 'static,
    {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Forward changes into an unbounded channel for async consumers.
    ///
    /// The listener stays registered until [`unsubscribe`](Self::unsubscribe)
    /// is called; sends after the receiver is dropped are discarded.
    pub fn subscribe_channel(&mut self) -> (ListenerId, mpsc::UnboundedReceiver<StateChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |key, value| {
            let _ = tx.send(StateChange {
                key: key.clone(),
                value: value.clone(),
            });
        });
        (id, rx)
    }

    fn notify(&mut self, key: &StateKey, value: &StateValue) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(key, value);
        }
    }

    // -------------------------------------------------------------------------
    // Acquisition-owned writes
    // -------------------------------------------------------------------------

    pub(crate) fn set_polling(&mut self, polling: bool) {
        if self.is_polling != polling {
            self.is_polling = polling;
            self.notify(&StateKey::IsPolling, &StateValue::Flag(polling));
        }
    }

    pub(crate) fn set_connected(&mut self, connected: bool) {
        if self.is_connected != connected {
            self.is_connected = connected;
            self.notify(&StateKey::IsConnected, &StateValue::Flag(connected));
        }
    }

    /// Run `sample` through the decimation policy and record it if accepted.
    ///
    /// Held readings leave the state untouched and notify nobody.
    pub(crate) fn ingest(&mut self, sample: Sample) -> Verdict {
        let verdict = self.policy.evaluate(&sample);
        if let Verdict::Accept {
            peak_tons,
            peak_raised,
            ..
        } = verdict
        {
            self.record_accepted(sample, peak_tons, peak_raised);
        }
        verdict
    }

    fn record_accepted(&mut self, sample: Sample, peak_tons: f64, peak_raised: bool) {
        debug!(
            load_tons = sample.load_tons(),
            load_kn = sample.load_kn(),
            peak_tons,
            "sample accepted"
        );

        Arc::make_mut(&mut self.samples).push(sample.clone());
        self.notify(
            &StateKey::Samples,
            &StateValue::Samples(Arc::clone(&self.samples)),
        );

        if peak_raised {
            self.peak_value = peak_tons;
            self.notify(&StateKey::PeakValue, &StateValue::Number(peak_tons));
        }

        let at = sample.timestamp();
        self.last_accepted_sample = Some(sample);
        self.last_accepted_at = Some(at);
        let value = StateValue::Sample(self.last_accepted_sample.clone());
        self.notify(&StateKey::LastAcceptedSample, &value);
        self.notify(&StateKey::LastAcceptedAt, &StateValue::Timestamp(Some(at)));
    }

    /// Reset samples, peak and decimation; clear equipment, keep calibration.
    ///
    /// # Errors
    ///
    /// [`Precondition::AlreadyPolling`] while acquisition is running.
    pub fn clear_data(&mut self) -> AppResult<()> {
        if self.is_polling {
            return Err(DaqError::precondition(Precondition::AlreadyPolling));
        }

        info!(
            session = %self.session_id,
            discarded = self.samples.len(),
            "clearing session data"
        );

        self.samples = Arc::new(Vec::new());
        self.peak_value = 0.0;
        self.last_accepted_sample = None;
        self.last_accepted_at = None;
        self.policy.reset();
        self.test_metadata.clear_equipment();

        self.notify(
            &StateKey::Samples,
            &StateValue::Samples(Arc::clone(&self.samples)),
        );
        self.notify(&StateKey::PeakValue, &StateValue::Number(0.0));
        self.notify(&StateKey::LastAcceptedSample, &StateValue::Sample(None));
        self.notify(&StateKey::LastAcceptedAt, &StateValue::Timestamp(None));
        let metadata = StateValue::Metadata(self.test_metadata.clone());
        self.notify(&StateKey::TestMetadata, &metadata);
        Ok(())
    }

    /// Digest for reports.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id,
            created_at: self.created_at,
            sample_count: self.samples.len(),
            peak_tons: self.peak_value,
            peak_kn: self.peak_value * STANDARD_GRAVITY,
            first_sample_at: self.samples.first().map(Sample::timestamp),
            last_sample_at: self.samples.last().map(Sample::timestamp),
            proof_load_tons: self.test_metadata.proof_load_tons().ok(),
            metadata: self.test_metadata.clone(),
        }
    }
}
