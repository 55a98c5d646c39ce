//! # repcount-core
//!
//! Hands-free rep counting: a loud sound (grunt, clap, shout) advances a
//! sets × reps × rest workout plan.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → detection loop (spawn_blocking)
//!                                                    │
//!                                      Level Meter → HysteresisTrigger
//!                                                    │  fire edge
//!                                         mpsc::Sender<MonitorEvent>
//!                                                    │
//!                                   SessionController (single task)
//!                                     ├─ RepDebouncer
//!                                     ├─ SessionMachine → Effects
//!                                     ├─ CueScheduler → CuePlayer
//!                                     └─ broadcast::Sender<SessionEvent>
//! ```
//!
//! The audio callback does not allocate after its first invocation. Session
//! state is only ever touched by the controller task.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod cue;
pub mod error;
pub mod ipc;
pub mod monitor;
pub mod permission;
pub mod persist;
pub mod session;
pub mod settings;
pub mod trigger;

// Convenience re-exports for downstream crates
pub use cue::{Cue, CuePlayer, LogCuePlayer};
pub use error::{RepCountError, Result};
pub use ipc::events::{EndReason, LevelEvent, SessionEvent, SessionStatus};
pub use monitor::{AudioSessionConfig, MicMonitor, Monitor, MonitorEvent};
pub use permission::{AlwaysGranted, PermissionProvider, PermissionStatus};
pub use persist::{FileStore, MemoryStore, SnapshotStore};
pub use session::{
    PersistedSnapshot, SessionController, SessionDeps, SessionHandle, SessionPhase,
    SessionTimings, WorkoutConfig,
};
pub use settings::WorkoutSettings;
pub use trigger::{Preset, SharedTriggerConfig, TriggerConfig};
