//! Hysteresis comparator turning a loudness stream into fire edges.
//!
//! ## Algorithm
//!
//! 1. Add the configured gain to the measured loudness.
//! 2. `Idle` and above the threshold → `Active`, report a fire.
//! 3. `Active` and below `threshold - reset_hysteresis` → `Idle`, silently.
//! 4. Anything else leaves the state untouched.
//!
//! A sustained shout hovering around the threshold therefore produces one
//! fire, not one per crossing.

use super::{FireDetector, SharedTriggerConfig, TriggerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerState {
    /// Waiting for loudness to exceed the threshold.
    #[default]
    Idle,
    /// Fired; waiting for loudness to drop below the reset level.
    Active,
}

/// Advance `state` by one loudness sample. Returns `true` only on `Idle → Active`.
pub fn evaluate(loudness_db: f32, config: &TriggerConfig, state: &mut TriggerState) -> bool {
    let effective = loudness_db + config.gain_db;
    match *state {
        TriggerState::Idle if effective > config.threshold_db() => {
            *state = TriggerState::Active;
            true
        }
        TriggerState::Active if effective < config.reset_db() => {
            *state = TriggerState::Idle;
            false
        }
        _ => false,
    }
}

/// Production `FireDetector`: reads the shared config on every sample.
#[derive(Debug, Clone)]
pub struct HysteresisTrigger {
    config: SharedTriggerConfig,
    state: TriggerState,
}

impl HysteresisTrigger {
    pub fn new(config: SharedTriggerConfig) -> Self {
        Self {
            config,
            state: TriggerState::Idle,
        }
    }

    #[cfg(test)]
    fn state(&self) -> TriggerState {
        self.state
    }
}

impl FireDetector for HysteresisTrigger {
    fn evaluate(&mut self, loudness_db: f32) -> bool {
        let config = self.config.get();
        evaluate(loudness_db, &config, &mut self.state)
    }

    fn threshold_db(&self) -> f32 {
        self.config.get().threshold_db()
    }

    fn reset(&mut self) {
        self.state = TriggerState::Idle;
    }
}
