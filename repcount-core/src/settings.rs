//! Persistent user settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::session::WorkoutConfig;
use crate::trigger::{clamp_sensitivity, Preset, TriggerConfig};

pub const MAX_TARGET_REPS: u32 = 50;
pub const MAX_TARGET_SETS: u32 = 20;
pub const MAX_REST_SECONDS: u32 = 600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct WorkoutSettings {
    pub preset: Preset,
    pub sensitivity_db: f32,
    pub target_reps: u32,
    pub target_sets: u32,
    pub rest_seconds: u32,
    pub preferred_input_device: Option<String>,
}

impl Default for WorkoutSettings {
    fn default() -> Self {
        let workout = WorkoutConfig::default();
        Self {
            preset: Preset::default(),
            sensitivity_db: 0.0,
            target_reps: workout.target_reps,
            target_sets: workout.target_sets,
            rest_seconds: workout.rest_seconds,
            preferred_input_device: None,
        }
    }
}

impl WorkoutSettings {
    pub fn normalize(&mut self) {
        self.sensitivity_db = clamp_sensitivity(self.sensitivity_db);
        self.target_reps = self.target_reps.clamp(1, MAX_TARGET_REPS);
        self.target_sets = self.target_sets.clamp(1, MAX_TARGET_SETS);
        self.rest_seconds = self.rest_seconds.min(MAX_REST_SECONDS);
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    /// Apply `REPCOUNT_PRESET` / `REPCOUNT_SENSITIVITY_DB` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var("REPCOUNT_PRESET") {
            match Preset::parse(&raw) {
                Some(preset) => self.preset = preset,
                None => warn!("ignoring unknown REPCOUNT_PRESET '{raw}'"),
            }
        }
        if let Ok(raw) = std::env::var("REPCOUNT_SENSITIVITY_DB") {
            match raw.trim().parse::<f32>() {
                Ok(db) => self.sensitivity_db = clamp_sensitivity(db),
                Err(_) => warn!("ignoring invalid REPCOUNT_SENSITIVITY_DB '{raw}'"),
            }
        }
    }

    pub fn workout(&self) -> WorkoutConfig {
        WorkoutConfig {
            target_reps: self.target_reps.max(1),
            target_sets: self.target_sets.max(1),
            rest_seconds: self.rest_seconds,
        }
    }

    pub fn trigger(&self) -> TriggerConfig {
        TriggerConfig::from_preset(self.preset, self.sensitivity_db)
    }
}

pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("RepCount")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("repcount")
    }
}

pub fn default_settings_path() -> PathBuf {
    default_data_dir().join("settings.json")
}

/// Load settings, falling back to defaults for a missing or unreadable file.
pub fn load_settings(path: &Path) -> WorkoutSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<WorkoutSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &WorkoutSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
