//! Notification types published to the host application.
//!
//! | Event | Channel |
//! |-------|---------|
//! | `SessionEvent` | `SessionHandle::subscribe()` |
//! | `LevelEvent` | `MicMonitor::subscribe_levels()` |
//!
//! All types serialise with camelCase fields so a UI layer can forward them
//! verbatim.

use serde::{Deserialize, Serialize};

use crate::session::SessionPhase;

// ---------------------------------------------------------------------------
// Session events
// ---------------------------------------------------------------------------

/// Emitted by the session controller on every observable change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Any change to phase, counters or the rest countdown.
    StateChanged { status: SessionStatus },
    /// A fire was accepted as a rep.
    #[serde(rename_all = "camelCase")]
    RepCounted {
        set: u32,
        rep: u32,
        reps_remaining: u32,
    },
    /// The session is over and the workout screen may be dismissed.
    Ended { reason: EndReason },
    /// Microphone permission is missing; counting is disabled until granted.
    PermissionDenied,
    /// The input device could not be opened; manual control still works.
    MonitorUnavailable { detail: String },
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    /// All sets done; sent after the finish cue has played.
    Completed,
    /// The user quit; no finish cue is played.
    Quit,
}

/// Read-only view of the session, for polling or for `StateChanged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub current_set: u32,
    pub current_rep: u32,
    pub reps_remaining: u32,
    pub rest_seconds_remaining: u32,
    pub target_reps: u32,
    pub target_sets: u32,
    pub rest_seconds: u32,
    /// A monitoring tap is currently installed.
    pub monitoring: bool,
    pub permission_denied: bool,
    pub monitor_unavailable: bool,
}

// ---------------------------------------------------------------------------
// Level events
// ---------------------------------------------------------------------------

/// Emitted once per analysed frame while monitoring, for calibration meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelEvent {
    /// Monotonically increasing frame counter within one arm.
    pub seq: u64,
    /// Measured loudness in dBFS (before gain).
    pub loudness_db: f32,
    /// Firing threshold in effect for this frame.
    pub threshold_db: f32,
    /// Whether this frame produced a fire edge.
    pub fired: bool,
}
