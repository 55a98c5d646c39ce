//! Second debounce layer: minimum spacing between accepted reps.
//!
//! Hysteresis alone lets two quick claps through as two fires; a real rep
//! cannot be that fast, so anything inside `min_interval` of the previously
//! accepted rep is rejected.

use std::time::Duration;

use tokio::time::Instant;

/// Recommended minimum spacing between reps.
pub const DEFAULT_MIN_REP_INTERVAL: Duration = Duration::from_millis(1300);

#[derive(Debug, Clone)]
pub struct RepDebouncer {
    min_interval: Duration,
    last_accepted: Option<Instant>,
}

impl RepDebouncer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: None,
        }
    }

    /// Returns `true` and records `now` if the fire is far enough from the last accepted one.
    pub fn on_fire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }

    #[cfg(test)]
    fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }

    /// Forget the last accepted rep (new session).
    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}

impl Default for RepDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_REP_INTERVAL)
    }
}
