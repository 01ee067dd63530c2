//! Bounded exponential backoff for the client's redial loop.

use std::time::Duration;

use crate::core::constants::{DEFAULT_REDIAL_MAX, DEFAULT_REDIAL_MIN};

/// Doubling delay clamped into `[min, max]`.
///
/// Every mutation clamps, so `min <= value() <= max` holds even when the
/// bounds are changed between calls with [`set_bounds`](Self::set_bounds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffController {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Default for BackoffController {
    fn default() -> Self {
        Self::new(DEFAULT_REDIAL_MIN, DEFAULT_REDIAL_MAX)
    }
}

impl BackoffController {
    /// Create a controller starting at `min`.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Lower bound.
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Upper bound.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Replace both bounds. The current value is re-clamped.
    pub fn set_bounds(&mut self, min: Duration, max: Duration) {
        self.min = min;
        self.max = max;
        self.current = self.clamp(self.current);
    }

    /// Double the delay.
    pub fn double(&mut self) {
        self.current = self.clamp(self.current.saturating_mul(2));
    }

    /// Halve the delay.
    pub fn halve(&mut self) {
        self.current = self.clamp(self.current / 2);
    }

    /// Snap to the lower bound.
    pub fn minimize(&mut self) {
        self.current = self.min;
    }

    /// Snap to the upper bound.
    pub fn maximize(&mut self) {
        self.current = self.max;
    }

    /// Current delay.
    pub fn value(&self) -> Duration {
        self.clamp(self.current)
    }

    // `Duration::clamp` panics when min > max.
    fn clamp(&self, value: Duration) -> Duration {
        if value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }
}
