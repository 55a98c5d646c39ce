//! Workout plan, live progress and the persisted snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RepCountError, Result};

/// Store key under which the in-progress session snapshot lives.
pub const SNAPSHOT_KEY: &str = "repcount.session";

/// Bumped whenever the snapshot layout changes incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The plan for one session: sets × reps × rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutConfig {
    pub target_reps: u32,
    pub target_sets: u32,
    pub rest_seconds: u32,
}

impl WorkoutConfig {
    pub fn new(target_reps: u32, target_sets: u32, rest_seconds: u32) -> Result<Self> {
        let config = Self {
            target_reps,
            target_sets,
            rest_seconds,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_reps == 0 {
            return Err(RepCountError::InvalidConfig("targetReps must be at least 1".into()));
        }
        if self.target_sets == 0 {
            return Err(RepCountError::InvalidConfig("targetSets must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for WorkoutConfig {
    fn default() -> Self {
        Self {
            target_reps: 10,
            target_sets: 3,
            rest_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Idle,
    Active,
    Resting,
    Paused,
    Completed,
}

impl SessionPhase {
    /// Phases a running session can be saved in and resumed from.
    pub fn is_resumable(self) -> bool {
        matches!(self, SessionPhase::Active | SessionPhase::Resting)
    }
}

/// Live progress. Owned by the session machine; everything else gets copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    /// 1-based.
    pub current_set: u32,
    /// Reps completed in the current set.
    pub current_rep: u32,
    pub reps_remaining: u32,
    pub rest_seconds_remaining: u32,
}

impl SessionState {
    /// Fresh state for the first set of `config`.
    pub fn first_set(config: &WorkoutConfig) -> Self {
        Self {
            phase: SessionPhase::Active,
            current_set: 1,
            current_rep: 0,
            reps_remaining: config.target_reps,
            rest_seconds_remaining: 0,
        }
    }
}

/// Phase stored in a snapshot. Only resumable phases can be represented, so a
/// stored `"paused"` or `"completed"` fails to parse and the snapshot is
/// treated as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotPhase {
    Active,
    Resting,
}

impl From<SnapshotPhase> for SessionPhase {
    fn from(phase: SnapshotPhase) -> Self {
        match phase {
            SnapshotPhase::Active => SessionPhase::Active,
            SnapshotPhase::Resting => SessionPhase::Resting,
        }
    }
}

impl TryFrom<SessionPhase> for SnapshotPhase {
    type Error = RepCountError;

    fn try_from(phase: SessionPhase) -> Result<Self> {
        match phase {
            SessionPhase::Active => Ok(SnapshotPhase::Active),
            SessionPhase::Resting => Ok(SnapshotPhase::Resting),
            other => Err(RepCountError::MalformedSnapshot(format!(
                "{other:?} is not a resumable phase"
            ))),
        }
    }
}

/// Serialisable projection of config + progress, used to resume after a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub version: u32,
    pub config: WorkoutConfig,
    pub phase: SnapshotPhase,
    pub current_set: u32,
    pub current_rep: u32,
    pub rest_seconds_remaining: u32,
    pub saved_at: DateTime<Utc>,
}

impl PersistedSnapshot {
    pub fn capture(config: WorkoutConfig, phase: SnapshotPhase, state: &SessionState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            config,
            phase,
            current_set: state.current_set,
            current_rep: state.current_rep,
            rest_seconds_remaining: state.rest_seconds_remaining,
            saved_at: Utc::now(),
        }
    }

    /// Check the counters are consistent with the plan.
    pub fn validate(&self) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(RepCountError::MalformedSnapshot(format!(
                "unsupported version {}",
                self.version
            )));
        }
        self.config
            .validate()
            .map_err(|e| RepCountError::MalformedSnapshot(e.to_string()))?;
        if self.current_set == 0 || self.current_set > self.config.target_sets {
            return Err(RepCountError::MalformedSnapshot(format!(
                "set {} outside 1..={}",
                self.current_set, self.config.target_sets
            )));
        }
        if self.current_rep > self.config.target_reps {
            return Err(RepCountError::MalformedSnapshot(format!(
                "rep {} exceeds target {}",
                self.current_rep, self.config.target_reps
            )));
        }
        if self.phase == SnapshotPhase::Resting && self.current_set >= self.config.target_sets {
            return Err(RepCountError::MalformedSnapshot(
                "resting after the final set".into(),
            ));
        }
        if self.rest_seconds_remaining > self.config.rest_seconds {
            return Err(RepCountError::MalformedSnapshot(format!(
                "rest {}s exceeds configured {}s",
                self.rest_seconds_remaining, self.config.rest_seconds
            )));
        }
        Ok(())
    }

    /// Progress this snapshot describes.
    pub fn state(&self) -> SessionState {
        SessionState {
            phase: self.phase.into(),
            current_set: self.current_set,
            current_rep: self.current_rep,
            reps_remaining: self.config.target_reps.saturating_sub(self.current_rep),
            rest_seconds_remaining: self.rest_seconds_remaining,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate stored bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self = serde_json::from_slice(bytes)
            .map_err(|e| RepCountError::MalformedSnapshot(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}
