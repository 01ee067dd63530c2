//! Heartbeat timing: idle-timeout derivation and the liveness timer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::ConfigError;
use crate::core::constants::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MISSED_HEARTBEATS};

/// Maximum silence tolerated on a connection.
///
/// `interval/2 + interval + missed_allowed * interval`: half an interval of
/// jitter allowance, one full cycle, then one more per tolerated miss. Always
/// strictly greater than `interval` for a non-zero interval.
pub fn idle_timeout(interval: Duration, missed_allowed: u32) -> Duration {
    (interval / 2)
        .saturating_add(interval)
        .saturating_add(interval.saturating_mul(missed_allowed))
}

/// Heartbeat settings shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Period between outgoing heartbeats.
    pub interval: Duration,
    /// Heartbeats that may go missing before the peer is declared dead.
    pub missed_allowed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            missed_allowed: DEFAULT_MISSED_HEARTBEATS,
        }
    }
}

impl HeartbeatConfig {
    /// Create a heartbeat configuration.
    pub fn new(interval: Duration, missed_allowed: u32) -> Self {
        Self {
            interval,
            missed_allowed,
        }
    }

    /// Deadline armed before every read and write on a connection.
    pub fn idle_timeout(&self) -> Duration {
        idle_timeout(self.interval, self.missed_allowed)
    }

    /// Reject settings that would make the timer spin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Running,
    Stopped,
}

#[derive(Debug)]
struct TimerShared {
    state: Mutex<TimerState>,
    done: CancellationToken,
}

/// Periodic trigger with idempotent, race-free shutdown.
///
/// Clones share one state machine (`Running` → `Stopped`). The first
/// [`stop`](Self::stop) from any clone or task wins; later calls are no-ops.
#[derive(Debug, Clone)]
pub struct LivenessTimer {
    period: Duration,
    shared: Arc<TimerShared>,
}

impl LivenessTimer {
    /// Create a running timer that fires every `period`.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            shared: Arc::new(TimerShared {
                state: Mutex::new(TimerState::Running),
                done: CancellationToken::new(),
            }),
        }
    }

    /// Timer period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Tick stream for the consumer. The first tick arrives one period from
    /// now, not immediately.
    pub fn ticks(&self) -> Ticks {
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ticks {
            interval,
            done: self.shared.done.clone(),
        }
    }

    /// Stop the timer. Returns `true` only for the call that performed the
    /// transition.
    pub fn stop(&self) -> bool {
        let mut state = self.shared.state.lock();
        match *state {
            TimerState::Running => {
                *state = TimerState::Stopped;
                self.shared.done.cancel();
                true
            }
            TimerState::Stopped => false,
        }
    }

    /// Check whether the timer has been stopped.
    pub fn is_stopped(&self) -> bool {
        *self.shared.state.lock() == TimerState::Stopped
    }

    /// Wait until the timer is stopped.
    pub async fn stopped(&self) {
        self.shared.done.cancelled().await;
    }
}

/// Ticks of a [`LivenessTimer`].
#[derive(Debug)]
pub struct Ticks {
    interval: Interval,
    done: CancellationToken,
}

impl Ticks {
    /// Wait for the next tick. Returns `None` once the timer is stopped,
    /// even if a tick is already due.
    pub async fn next(&mut self) -> Option<Instant> {
        tokio::select! {
            biased;
            _ = self.done.cancelled() => None,
            at = self.interval.tick() => Some(at),
        }
    }
}
