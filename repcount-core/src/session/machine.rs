//! Pure session state machine.
//!
//! Every transition mutates `SessionState` and returns the side effects the
//! controller must carry out, in order. Nothing here sleeps, spawns or does
//! I/O, so each transition can be tested synchronously.
//!
//! User commands in the wrong phase are errors. Detection input in the wrong
//! phase (`on_fire`, `complete_rep`, `end_of_set`, `tick`) is dropped and
//! returns no effects.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use super::{
    debounce::RepDebouncer,
    model::{PersistedSnapshot, SessionPhase, SessionState, SnapshotPhase, WorkoutConfig},
    SessionTimings,
};
use crate::{
    cue::{milestone_for, scheduler::CueSlot, Cue},
    error::{RepCountError, Result},
    ipc::events::{EndReason, SessionEvent, SessionStatus},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Abort every pending timer and delayed cue.
    CancelPending,
    /// Silence the player.
    StopPlayback,
    Cues {
        slot: CueSlot,
        delay: Duration,
        cues: Vec<Cue>,
    },
    /// Play `cues` after whatever is still sequenced in `slot`.
    QueueCues { slot: CueSlot, cues: Vec<Cue> },
    /// Install the microphone tap, now or after `delay`.
    ArmMonitor { delay: Duration },
    DisarmMonitor,
    ScheduleEndOfSet { delay: Duration },
    /// Next countdown tick one tick interval from now.
    ScheduleTick,
    SaveSnapshot(PersistedSnapshot),
    DeleteSnapshot,
    /// Play the finish cue and signal completion once it has played.
    Finish,
    /// Play the resume cue after `delay`; when `arm_after`, arm monitoring
    /// once the cue has played.
    ResumeCue { delay: Duration, arm_after: bool },
    Notify(SessionEvent),
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    config: WorkoutConfig,
    state: SessionState,
    debouncer: RepDebouncer,
    timings: SessionTimings,
    /// Phase a paused session returns to.
    paused_from: Option<SessionPhase>,
}

impl SessionMachine {
    pub fn new(timings: SessionTimings) -> Self {
        Self {
            config: WorkoutConfig::default(),
            state: SessionState::default(),
            debouncer: RepDebouncer::new(timings.min_rep_interval),
            timings,
            paused_from: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> WorkoutConfig {
        self.config
    }

    pub fn timings(&self) -> &SessionTimings {
        &self.timings
    }

    /// Progress view without the controller-owned flags.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.state.phase,
            current_set: self.state.current_set,
            current_rep: self.state.current_rep,
            reps_remaining: self.state.reps_remaining,
            rest_seconds_remaining: self.state.rest_seconds_remaining,
            target_reps: self.config.target_reps,
            target_sets: self.config.target_sets,
            rest_seconds: self.config.rest_seconds,
            monitoring: false,
            permission_denied: false,
            monitor_unavailable: false,
        }
    }

    /// Resumable snapshot of the running session. A paused session is
    /// captured in the phase it was paused from.
    pub fn snapshot(&self) -> Option<PersistedSnapshot> {
        let phase = match self.state.phase {
            SessionPhase::Paused => self.paused_from?,
            phase => phase,
        };
        let phase = SnapshotPhase::try_from(phase).ok()?;
        Some(PersistedSnapshot::capture(self.config, phase, &self.state))
    }

    pub fn start(&mut self, config: WorkoutConfig) -> Result<Vec<Effect>> {
        self.require("start", &[SessionPhase::Idle, SessionPhase::Completed])?;
        config.validate()?;

        self.config = config;
        self.state = SessionState::first_set(&config);
        self.debouncer.reset();
        self.paused_from = None;
        info!(
            reps = config.target_reps,
            sets = config.target_sets,
            rest = config.rest_seconds,
            "session started"
        );

        let mut effects = vec![
            Effect::CancelPending,
            Effect::Cues {
                slot: CueSlot::Transition,
                delay: Duration::ZERO,
                cues: vec![Cue::Start],
            },
            Effect::ArmMonitor {
                delay: self.timings.start_grace,
            },
        ];
        effects.extend(self.save());
        Ok(effects)
    }

    /// A fire accepted by the monitor. Applies phase, plan and debounce checks.
    pub fn on_fire(&mut self, now: Instant) -> Vec<Effect> {
        if self.state.phase != SessionPhase::Active {
            debug!(phase = ?self.state.phase, "fire outside active phase dropped");
            return Vec::new();
        }
        if self.state.reps_remaining == 0 {
            debug!("fire after final rep of set dropped");
            return Vec::new();
        }
        if !self.debouncer.on_fire(now) {
            debug!("fire inside minimum rep interval dropped");
            return Vec::new();
        }
        self.complete_rep()
    }

    /// Count one rep. No-op outside Active or once the set's reps are done.
    pub fn complete_rep(&mut self) -> Vec<Effect> {
        if self.state.phase != SessionPhase::Active || self.state.reps_remaining == 0 {
            return Vec::new();
        }
        self.state.current_rep += 1;
        self.state.reps_remaining -= 1;
        let SessionState {
            current_set: set,
            current_rep: rep,
            reps_remaining,
            ..
        } = self.state;
        debug!(set, rep, reps_remaining, "rep counted");

        let mut effects = Vec::new();
        if reps_remaining == 0 {
            // Before anything else: no fire may count between here and Resting.
            effects.push(Effect::DisarmMonitor);
        }
        effects.push(Effect::Notify(SessionEvent::RepCounted {
            set,
            rep,
            reps_remaining,
        }));
        let mut cues = vec![Cue::Rep(rep)];
        cues.extend(milestone_for(rep, reps_remaining));
        effects.push(Effect::Cues {
            slot: CueSlot::Rep,
            delay: self.timings.rep_cue_delay,
            cues,
        });
        if reps_remaining == 0 {
            effects.push(Effect::ScheduleEndOfSet {
                delay: self.timings.end_of_set_delay,
            });
        }
        effects.extend(self.save());
        effects
    }

    /// Runs once the final rep's cues have had time to play.
    pub fn end_of_set(&mut self) -> Vec<Effect> {
        if self.state.phase != SessionPhase::Active || self.state.reps_remaining != 0 {
            return Vec::new();
        }

        if self.state.current_set >= self.config.target_sets {
            self.state.phase = SessionPhase::Completed;
            info!(sets = self.state.current_set, "workout completed");
            return vec![
                Effect::DisarmMonitor,
                Effect::CancelPending,
                Effect::DeleteSnapshot,
                Effect::Finish,
            ];
        }

        self.state.phase = SessionPhase::Resting;
        self.state.rest_seconds_remaining = self.config.rest_seconds;
        info!(
            set = self.state.current_set,
            rest = self.config.rest_seconds,
            "set complete, resting"
        );
        let mut effects = vec![
            Effect::DisarmMonitor,
            Effect::Cues {
                slot: CueSlot::Transition,
                delay: Duration::ZERO,
                cues: vec![Cue::SetComplete, Cue::Rest(self.config.rest_seconds)],
            },
            Effect::ScheduleTick,
        ];
        effects.extend(self.save());
        effects
    }

    /// One countdown second.
    pub fn tick(&mut self) -> Vec<Effect> {
        if self.state.phase != SessionPhase::Resting {
            return Vec::new();
        }
        if self.state.rest_seconds_remaining > 0 {
            self.state.rest_seconds_remaining -= 1;
            if self.state.rest_seconds_remaining > 0 {
                let mut effects = Vec::new();
                if self.state.rest_seconds_remaining == self.timings.get_ready_at {
                    // A short rest can still be announcing itself.
                    effects.push(Effect::QueueCues {
                        slot: CueSlot::Transition,
                        cues: vec![Cue::GetReady],
                    });
                }
                effects.push(Effect::ScheduleTick);
                effects.extend(self.save());
                return effects;
            }
        }
        self.next_set()
    }

    fn next_set(&mut self) -> Vec<Effect> {
        self.state = SessionState {
            phase: SessionPhase::Active,
            current_set: self.state.current_set + 1,
            current_rep: 0,
            reps_remaining: self.config.target_reps,
            rest_seconds_remaining: 0,
        };
        self.debouncer.reset();
        info!(set = self.state.current_set, "next set");

        let cue = if self.state.current_set >= self.config.target_sets {
            Cue::LastSet
        } else {
            Cue::NextSet
        };
        let mut effects = vec![
            Effect::ArmMonitor {
                delay: Duration::ZERO,
            },
            Effect::Cues {
                slot: CueSlot::Transition,
                delay: self.timings.set_cue_delay,
                cues: vec![cue],
            },
        ];
        effects.extend(self.save());
        effects
    }

    pub fn pause(&mut self) -> Result<Vec<Effect>> {
        let from = self.require("pause", &[SessionPhase::Active, SessionPhase::Resting])?;
        self.paused_from = Some(from);
        self.state.phase = SessionPhase::Paused;
        info!(from = ?from, "session paused");

        let mut effects = vec![
            Effect::CancelPending,
            Effect::DisarmMonitor,
            Effect::Cues {
                slot: CueSlot::Transition,
                delay: Duration::ZERO,
                cues: vec![Cue::Paused],
            },
        ];
        // Still stored as `from`, so a crash while paused resumes correctly.
        effects.extend(self.save());
        Ok(effects)
    }

    pub fn resume(&mut self) -> Result<Vec<Effect>> {
        self.require("resume", &[SessionPhase::Paused])?;
        let to = self.paused_from.take().unwrap_or(SessionPhase::Active);
        self.state.phase = to;
        info!(to = ?to, "session resumed");

        let mut effects = self.continue_in_phase(Duration::ZERO);
        effects.extend(self.save());
        Ok(effects)
    }

    /// End the session from any phase without the finish cue.
    pub fn quit(&mut self) -> Vec<Effect> {
        info!(phase = ?self.state.phase, "session quit");
        self.state = SessionState::default();
        self.paused_from = None;
        self.debouncer.reset();
        vec![
            Effect::CancelPending,
            Effect::DisarmMonitor,
            Effect::StopPlayback,
            Effect::DeleteSnapshot,
            Effect::Notify(SessionEvent::Ended {
                reason: EndReason::Quit,
            }),
        ]
    }

    /// Rehydrate a saved session. Replays no transition cues, only "resume".
    pub fn restore(&mut self, snapshot: &PersistedSnapshot) -> Result<Vec<Effect>> {
        self.require("restore", &[SessionPhase::Idle, SessionPhase::Completed])?;
        snapshot.validate()?;

        self.config = snapshot.config;
        self.state = snapshot.state();
        self.debouncer.reset();
        self.paused_from = None;
        info!(
            phase = ?self.state.phase,
            set = self.state.current_set,
            rep = self.state.current_rep,
            "session restored"
        );

        let mut effects = vec![Effect::CancelPending];
        effects.extend(self.continue_in_phase(self.timings.restore_cue_delay));
        effects.extend(self.save());
        Ok(effects)
    }

    /// Pick up in the current phase after pause or restore.
    fn continue_in_phase(&self, cue_delay: Duration) -> Vec<Effect> {
        match self.state.phase {
            SessionPhase::Resting => vec![
                Effect::ResumeCue {
                    delay: cue_delay,
                    arm_after: false,
                },
                Effect::ScheduleTick,
            ],
            SessionPhase::Active if self.state.reps_remaining == 0 => vec![
                Effect::ResumeCue {
                    delay: cue_delay,
                    arm_after: false,
                },
                Effect::ScheduleEndOfSet {
                    delay: self.timings.end_of_set_delay,
                },
            ],
            _ => vec![Effect::ResumeCue {
                delay: cue_delay,
                arm_after: true,
            }],
        }
    }

    fn save(&self) -> Option<Effect> {
        self.snapshot().map(Effect::SaveSnapshot)
    }

    fn require(&self, op: &'static str, allowed: &[SessionPhase]) -> Result<SessionPhase> {
        let phase = self.state.phase;
        if allowed.contains(&phase) {
            Ok(phase)
        } else {
            Err(RepCountError::InvalidTransition { op, phase })
        }
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new(SessionTimings::default())
    }
}
