//! Sound-trigger detection.
//!
//! The `FireDetector` trait is the seam between the detection pipeline and
//! the edge detector: `HysteresisTrigger` is the production implementation,
//! tests swap in scripted detectors without touching the pipeline.

pub mod hysteresis;
pub mod level;

pub use hysteresis::{HysteresisTrigger, TriggerState};
pub use level::{measure, SILENCE_DB};

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Largest sensitivity adjustment (either direction) applied to a preset threshold.
pub const MAX_SENSITIVITY_DB: f32 = 10.0;

/// Loudness must fall this far below the threshold before another fire can occur.
pub const DEFAULT_RESET_HYSTERESIS_DB: f32 = 10.0;

/// Named threshold/gain bundles tuned for an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Home training: quiet background, soft cues such as a clap.
    QuietRoom,
    /// Typical gym floor.
    #[default]
    Gym,
    /// Loud music or crowd; only a shout should count.
    NoisyVenue,
}

impl Preset {
    /// Base threshold in dBFS for this preset.
    pub fn base_threshold_db(self) -> f32 {
        match self {
            Preset::QuietRoom => -30.0,
            Preset::Gym => -10.0,
            Preset::NoisyVenue => -6.0,
        }
    }

    /// Software gain in dB added to every measured loudness value.
    pub fn gain_db(self) -> f32 {
        match self {
            Preset::QuietRoom => 6.0,
            Preset::Gym => 0.0,
            Preset::NoisyVenue => -6.0,
        }
    }

    /// Lenient parse used for settings files and environment overrides.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "quiet" | "quiet_room" | "home" => Some(Preset::QuietRoom),
            "gym" | "default" => Some(Preset::Gym),
            "noisy" | "noisy_venue" | "loud" => Some(Preset::NoisyVenue),
            _ => None,
        }
    }
}

/// Trigger thresholds read by the detector on every loudness sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    pub base_threshold_db: f32,
    pub gain_db: f32,
    pub reset_hysteresis_db: f32,
    /// User adjustment added to the base threshold, within ±`MAX_SENSITIVITY_DB`.
    pub sensitivity_db: f32,
}

impl TriggerConfig {
    pub fn from_preset(preset: Preset, sensitivity_db: f32) -> Self {
        Self {
            base_threshold_db: preset.base_threshold_db(),
            gain_db: preset.gain_db(),
            reset_hysteresis_db: DEFAULT_RESET_HYSTERESIS_DB,
            sensitivity_db: clamp_sensitivity(sensitivity_db),
        }
    }

    /// Effective firing threshold (base + sensitivity).
    pub fn threshold_db(&self) -> f32 {
        self.base_threshold_db + self.sensitivity_db
    }

    /// Level the gained loudness must drop below to re-arm.
    pub fn reset_db(&self) -> f32 {
        self.threshold_db() - self.reset_hysteresis_db
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self::from_preset(Preset::default(), 0.0)
    }
}

pub fn clamp_sensitivity(sensitivity_db: f32) -> f32 {
    if sensitivity_db.is_finite() {
        sensitivity_db.clamp(-MAX_SENSITIVITY_DB, MAX_SENSITIVITY_DB)
    } else {
        0.0
    }
}

/// Trigger config shared between user configuration and the detection thread.
///
/// The detection thread takes a short read lock once per frame; writers are
/// rare (a settings change), so contention is negligible.
#[derive(Debug, Clone, Default)]
pub struct SharedTriggerConfig(Arc<RwLock<TriggerConfig>>);

impl SharedTriggerConfig {
    pub fn new(config: TriggerConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    pub fn get(&self) -> TriggerConfig {
        *self.0.read()
    }

    pub fn set(&self, config: TriggerConfig) {
        *self.0.write() = config;
    }

    /// Switch preset while keeping the current sensitivity adjustment.
    pub fn set_preset(&self, preset: Preset) {
        let mut guard = self.0.write();
        *guard = TriggerConfig::from_preset(preset, guard.sensitivity_db);
    }

    pub fn set_sensitivity(&self, sensitivity_db: f32) {
        self.0.write().sensitivity_db = clamp_sensitivity(sensitivity_db);
    }
}

/// Trait for all fire detectors.
///
/// Implementors are stateful (the hysteresis edge state).
pub trait FireDetector: Send + 'static {
    /// Feed one loudness sample (dBFS). Returns `true` exactly on a fire edge.
    fn evaluate(&mut self, loudness_db: f32) -> bool;

    /// Current firing threshold, reported alongside level events.
    fn threshold_db(&self) -> f32;

    /// Return to the idle state. Called on every monitoring start/stop.
    fn reset(&mut self);
}
