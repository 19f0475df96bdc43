//! Session lifecycle state machine and stall detection.
//!
//! The media layer gives no failure signal when a stream silently dies, so
//! health is inferred by polling a liveness sample (playback position) on a
//! fixed interval. A sample repeated across two consecutive polls marks the
//! session stalled.
//!
//! Every start attempt gets a new generation number. Completions and ticks
//! tagged with an older generation belong to a cancelled attempt and are
//! ignored.

use crate::pipeline::messages::Completion;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle of the live media session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never started, or the last start attempt failed.
    Inactive,
    /// Handshake in progress.
    Starting,
    /// Media is flowing; queries go straight to the backend.
    Active,
    /// A stall was detected; transport is being rebuilt.
    Reconnecting,
    /// Torn down by the user. Input is rejected until the next start.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Inactive => "inactive",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Result of feeding one liveness sample to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessVerdict {
    /// Sample advanced (or is the first baseline).
    Healthy,
    /// Sample unchanged since the previous poll; now `Reconnecting`.
    Stalled,
    /// Not applicable: wrong state, stale generation, or no sample.
    Ignored,
}

/// Owns [`SessionState`] and the stall detector.
#[derive(Debug)]
pub struct SessionMonitor {
    state: SessionState,
    generation: u64,
    last_sample: Option<Duration>,
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SessionState::Inactive,
            generation: 0,
            last_sample: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Enter `Starting` with a fresh generation.
    ///
    /// Allowed from `Inactive`, `Closed` and `Reconnecting`; returns `None`
    /// if a start is already under way or the session is active.
    pub fn begin_start(&mut self) -> Option<u64> {
        match self.state {
            SessionState::Inactive | SessionState::Closed | SessionState::Reconnecting => {
                self.generation = self.generation.wrapping_add(1);
                self.state = SessionState::Starting;
                self.last_sample = None;
                Some(self.generation)
            }
            SessionState::Starting | SessionState::Active => None,
        }
    }

    /// `Starting → Active` for the current generation. Returns true if the
    /// transition happened, i.e. the caller should drain pending queries.
    pub fn activate(&mut self, generation: u64) -> bool {
        if self.state != SessionState::Starting || !self.is_current(generation) {
            return false;
        }
        self.state = SessionState::Active;
        self.last_sample = None;
        true
    }

    /// `Starting → Inactive` for the current generation.
    pub fn fail_start(&mut self, generation: u64) -> bool {
        if self.state != SessionState::Starting || !self.is_current(generation) {
            return false;
        }
        self.state = SessionState::Inactive;
        true
    }

    /// Feed one liveness sample taken at a health tick.
    ///
    /// Only the first repeated sample triggers `Stalled`: the state leaves
    /// `Active`, so further ticks are ignored until a reconnect succeeds.
    pub fn observe(&mut self, generation: u64, sample: Option<Duration>) -> LivenessVerdict {
        if self.state != SessionState::Active || !self.is_current(generation) {
            return LivenessVerdict::Ignored;
        }
        let Some(sample) = sample else {
            self.last_sample = None;
            return LivenessVerdict::Ignored;
        };
        match self.last_sample {
            Some(previous) if previous == sample => {
                self.state = SessionState::Reconnecting;
                self.last_sample = None;
                LivenessVerdict::Stalled
            }
            _ => {
                self.last_sample = Some(sample);
                LivenessVerdict::Healthy
            }
        }
    }

    /// Any state → `Closed`. Bumps the generation so every in-flight
    /// operation of the old session becomes stale. Returns the prior state.
    pub fn stop(&mut self) -> SessionState {
        let previous = self.state;
        self.state = SessionState::Closed;
        self.generation = self.generation.wrapping_add(1);
        self.last_sample = None;
        previous
    }
}

/// Post a [`Completion::HealthTick`] every `period` until cancelled.
///
/// The first tick fires one full period after spawning.
pub(crate) fn spawn_health_ticker(
    period: Duration,
    generation: u64,
    tx: mpsc::UnboundedSender<Completion>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if tx.send(Completion::HealthTick { generation }).is_err() {
                        break;
                    }
                }
            }
        }
        debug!(generation, "health ticker stopped");
    })
}
