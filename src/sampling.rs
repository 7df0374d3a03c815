//! Hold-and-threshold decimation with running peak.
//!
//! A reading is accepted when the load moved by more than the hold threshold
//! since the last accepted sample, or when the heartbeat interval has elapsed
//! since then, whichever comes first. Small jitter is suppressed while a steady
//! load still produces one sample per heartbeat.
//!
//! All bookkeeping lives in [`DecimationState`], which only changes on
//! acceptance. Feeding the same sequence of samples into a fresh policy always
//! produces the same verdicts.

use crate::sample::Sample;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default minimum load change forcing acceptance (tons).
pub const DEFAULT_HOLD_THRESHOLD_TONS: f64 = 0.02;

/// Default maximum interval between accepted samples.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(5000);

/// Which clause of the acceptance rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptReason {
    /// `|Δload| > threshold`
    LoadChanged,
    /// `now - last_accepted_at >= heartbeat`
    Heartbeat,
}

/// Outcome of evaluating one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Keep the reading.
    Accept {
        /// Clause that fired
        reason: AcceptReason,
        /// Peak after this reading
        peak_tons: f64,
        /// Whether this reading raised the peak
        peak_raised: bool,
    },
    /// Drop the reading. Not an error.
    Hold {
        /// `load - last_accepted_load`
        delta_tons: f64,
        /// Time since the last accepted sample
        elapsed: Duration,
    },
}

impl Verdict {
    /// True for [`Verdict::Accept`].
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept { .. })
    }
}

/// Decimation bookkeeping. Default is the empty session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecimationState {
    /// Load of the last accepted sample, 0 if none
    pub last_load_tons: f64,
    /// Time of the last accepted sample, `None` reads as the Unix epoch
    pub last_accepted_at: Option<DateTime<Utc>>,
    /// Maximum accepted load, 0 if none
    pub peak_tons: f64,
}

/// Accept/hold decision for incoming readings.
#[derive(Debug, Clone)]
pub struct SamplingPolicy {
    hold_threshold_tons: f64,
    heartbeat: Duration,
    state: DecimationState,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_HOLD_THRESHOLD_TONS, DEFAULT_HEARTBEAT)
    }
}

impl SamplingPolicy {
    /// Create a policy with empty state.
    pub fn new(hold_threshold_tons: f64, heartbeat: Duration) -> Self {
        Self {
            hold_threshold_tons,
            heartbeat,
            state: DecimationState::default(),
        }
    }

    /// Hold threshold in tons.
    pub fn hold_threshold_tons(&self) -> f64 {
        self.hold_threshold_tons
    }

    /// Heartbeat interval.
    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Current bookkeeping.
    pub fn state(&self) -> &DecimationState {
        &self.state
    }

    /// Running peak over accepted samples.
    pub fn peak_tons(&self) -> f64 {
        self.state.peak_tons
    }

    /// Decide on `sample` and, if accepted, advance the bookkeeping.
    pub fn evaluate(&mut self, sample: &Sample) -> Verdict {
        let load = sample.load_tons();
        let delta_tons = load - self.state.last_load_tons;
        let last_at = self
            .state
            .last_accepted_at
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let elapsed = (sample.timestamp() - last_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let reason = if delta_tons.abs() > self.hold_threshold_tons {
            AcceptReason::LoadChanged
        } else if elapsed >= self.heartbeat {
            AcceptReason::Heartbeat
        } else {
            return Verdict::Hold {
                delta_tons,
                elapsed,
            };
        };

        let peak_raised = load > self.state.peak_tons;
        if peak_raised {
            self.state.peak_tons = load;
        }
        self.state.last_load_tons = load;
        self.state.last_accepted_at = Some(sample.timestamp());

        Verdict::Accept {
            reason,
            peak_tons: self.state.peak_tons,
            peak_raised,
        }
    }

    /// Forget all accepted history.
    pub fn reset(&mut self) {
        self.state = DecimationState::default();
    }
}
