//! Workout progression.
//!
//! ## Phases
//!
//! ```text
//!            start / restore
//!   Idle ─────────────────────► Active ──(last rep + 2.5 s)──► Resting
//!    ▲  ◄─────── quit (any) ──────  │  ▲                          │
//!    │                              │  └──── countdown hits 0 ─────┘
//!    │                   final set  ▼
//!    └───── start/restore ──── Completed
//!
//!   Active | Resting ──pause──► Paused ──resume──► previous phase
//! ```
//!
//! `SessionMachine` owns the state and decides; `SessionController` is the
//! single async context that feeds it events and carries out its effects.

pub mod controller;
pub mod debounce;
pub mod machine;
pub mod model;
pub mod timers;

pub use controller::{SessionController, SessionDeps, SessionHandle};
pub use debounce::{RepDebouncer, DEFAULT_MIN_REP_INTERVAL};
pub use machine::{Effect, SessionMachine};
pub use model::{
    PersistedSnapshot, SessionPhase, SessionState, SnapshotPhase, WorkoutConfig, SNAPSHOT_KEY,
    SNAPSHOT_VERSION,
};

use std::time::Duration;

use crate::cue::scheduler::DEFAULT_SEQUENCE_BUFFER;

/// Every delay the session applies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionTimings {
    /// Start cue → monitoring armed. Keeps the start cue from counting as a rep.
    pub start_grace: Duration,
    /// Fire → rep number cue, so the cue does not talk over the triggering sound.
    pub rep_cue_delay: Duration,
    /// Last rep → end-of-set handling.
    pub end_of_set_delay: Duration,
    /// Next set started → "next set"/"last set" cue.
    pub set_cue_delay: Duration,
    /// Restore → resume cue.
    pub restore_cue_delay: Duration,
    /// Gap after a cue's reported duration before the next cue.
    pub sequence_buffer: Duration,
    pub min_rep_interval: Duration,
    pub countdown_tick: Duration,
    /// Rest seconds remaining at which the get-ready cue plays.
    pub get_ready_at: u32,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            start_grace: Duration::from_secs(3),
            rep_cue_delay: Duration::from_millis(600),
            end_of_set_delay: Duration::from_millis(2500),
            set_cue_delay: Duration::from_millis(300),
            restore_cue_delay: Duration::from_millis(500),
            sequence_buffer: DEFAULT_SEQUENCE_BUFFER,
            min_rep_interval: DEFAULT_MIN_REP_INTERVAL,
            countdown_tick: Duration::from_secs(1),
            get_ready_at: 10,
        }
    }
}
