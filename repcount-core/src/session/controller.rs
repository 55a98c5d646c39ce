//! `SessionController`: the single control context.
//!
//! ## Threading
//!
//! ```text
//! detection thread ──MonitorEvent──┐
//! timer tasks ───────TimerFired────┼──► SessionController::run (one task)
//! SessionHandle ─────Command───────┘         │
//!                                            ├─► SessionMachine (state)
//!                                            ├─► CueScheduler → CuePlayer
//!                                            ├─► Monitor arm/disarm
//!                                            └─► broadcast::Sender<SessionEvent>
//! ```
//!
//! The run loop selects with `biased` priority: timers, then monitor events,
//! then commands. Every transition is handled to completion before the next
//! message is taken, so `SessionState` has exactly one writer.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    machine::{Effect, SessionMachine},
    model::{PersistedSnapshot, SessionPhase, WorkoutConfig},
    timers::{TimerFired, TimerKey, Timers},
    SessionTimings,
};
use crate::{
    cue::{Cue, CuePlayer, CueScheduler},
    error::{RepCountError, Result},
    ipc::events::{EndReason, SessionEvent, SessionStatus},
    monitor::{Monitor, MonitorEvent},
    permission::{ensure_granted, PermissionProvider},
    persist::{delete_snapshot, load_snapshot, save_snapshot, SnapshotStore},
};

const COMMAND_CHANNEL_CAP: usize = 32;
const EVENT_BROADCAST_CAP: usize = 256;

/// External collaborators the controller drives.
pub struct SessionDeps {
    pub monitor: Box<dyn Monitor>,
    /// Receiving half of the channel the monitor posts fires into.
    pub monitor_events: mpsc::Receiver<MonitorEvent>,
    pub player: Arc<dyn CuePlayer>,
    pub store: Arc<dyn SnapshotStore>,
    pub permission: Arc<dyn PermissionProvider>,
}

type Reply = oneshot::Sender<Result<()>>;

enum Command {
    Start { config: WorkoutConfig, reply: Reply },
    CompleteRep { reply: Reply },
    Pause { reply: Reply },
    Resume { reply: Reply },
    Quit { reply: Reply },
    Restore { snapshot: Box<PersistedSnapshot>, reply: Reply },
    Shutdown,
}

/// Cloneable front end to a running controller.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: Arc<Mutex<SessionStatus>>,
    events: broadcast::Sender<SessionEvent>,
    store: Arc<dyn SnapshotStore>,
}

impl SessionHandle {
    pub async fn start(&self, config: WorkoutConfig) -> Result<()> {
        self.request(|reply| Command::Start { config, reply }).await
    }

    /// Count a rep by hand (tap instead of sound). Ignored outside Active.
    pub async fn complete_rep(&self) -> Result<()> {
        self.request(|reply| Command::CompleteRep { reply }).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(|reply| Command::Resume { reply }).await
    }

    pub async fn quit(&self) -> Result<()> {
        self.request(|reply| Command::Quit { reply }).await
    }

    pub async fn restore(&self, snapshot: PersistedSnapshot) -> Result<()> {
        let snapshot = Box::new(snapshot);
        self.request(|reply| Command::Restore { snapshot, reply }).await
    }

    /// Saved session from a previous run, if one is resumable.
    pub fn pending_snapshot(&self) -> Option<PersistedSnapshot> {
        load_snapshot(self.store.as_ref())
    }

    /// Current status (snapshot).
    pub fn status(&self) -> SessionStatus {
        self.status.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Stop the controller task. Monitoring and pending cues are torn down.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    async fn request(&self, make: impl FnOnce(Reply) -> Command) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| RepCountError::ControllerClosed)?;
        rx.await.map_err(|_| RepCountError::ControllerClosed)?
    }
}

pub struct SessionController {
    machine: SessionMachine,
    monitor: Box<dyn Monitor>,
    monitor_events: mpsc::Receiver<MonitorEvent>,
    cues: CueScheduler,
    store: Arc<dyn SnapshotStore>,
    permission: Arc<dyn PermissionProvider>,
    timers: Timers,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    commands: mpsc::Receiver<Command>,
    status: Arc<Mutex<SessionStatus>>,
    events: broadcast::Sender<SessionEvent>,
    /// Whether the pending resume cue should arm monitoring once played.
    resume_arms_monitor: bool,
    permission_denied: bool,
    monitor_unavailable: bool,
}

impl SessionController {
    pub fn new(deps: SessionDeps, timings: SessionTimings) -> (Self, SessionHandle) {
        let machine = SessionMachine::new(timings);
        let (commands_tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAP);
        let (events, _) = broadcast::channel(EVENT_BROADCAST_CAP);
        let (timers, timer_rx) = Timers::new();
        let status = Arc::new(Mutex::new(machine.status()));

        let handle = SessionHandle {
            commands: commands_tx,
            status: Arc::clone(&status),
            events: events.clone(),
            store: Arc::clone(&deps.store),
        };
        let controller = Self {
            cues: CueScheduler::new(deps.player, timings.sequence_buffer),
            machine,
            monitor: deps.monitor,
            monitor_events: deps.monitor_events,
            store: deps.store,
            permission: deps.permission,
            timers,
            timer_rx,
            commands,
            status,
            events,
            resume_arms_monitor: false,
            permission_denied: false,
            monitor_unavailable: false,
        };
        (controller, handle)
    }

    /// Build a controller and run it on the current runtime.
    pub fn spawn(deps: SessionDeps, timings: SessionTimings) -> (SessionHandle, JoinHandle<()>) {
        let (controller, handle) = Self::new(deps, timings);
        let task = tokio::spawn(controller.run());
        (handle, task)
    }

    pub async fn run(mut self) {
        info!("session controller started");
        loop {
            tokio::select! {
                biased;
                Some(fired) = self.timer_rx.recv() => self.on_timer(fired),
                Some(event) = self.monitor_events.recv() => self.on_monitor_event(event),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
            }
        }
        self.timers.cancel_all();
        self.cues.stop_all();
        self.monitor.disarm();
        info!("session controller stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Start { config, reply } => {
                let result = match self.machine.start(config) {
                    Ok(effects) => {
                        self.monitor_unavailable = false;
                        self.check_permission().await;
                        self.apply(effects);
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::CompleteRep { reply } => {
                let effects = self.machine.complete_rep();
                self.apply(effects);
                let _ = reply.send(Ok(()));
            }
            Command::Pause { reply } => {
                let result = self.machine.pause().map(|effects| self.apply(effects));
                let _ = reply.send(result);
            }
            Command::Resume { reply } => {
                let result = match self.machine.resume() {
                    Ok(effects) => {
                        self.check_permission().await;
                        self.apply(effects);
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Quit { reply } => {
                let effects = self.machine.quit();
                self.apply(effects);
                let _ = reply.send(Ok(()));
            }
            Command::Restore { snapshot, reply } => {
                let result = match self.machine.restore(&snapshot) {
                    Ok(effects) => {
                        self.monitor_unavailable = false;
                        self.check_permission().await;
                        self.apply(effects);
                        Ok(())
                    }
                    Err(e @ RepCountError::MalformedSnapshot(_)) => {
                        warn!("discarding unusable snapshot: {e}");
                        delete_snapshot(self.store.as_ref());
                        Err(e)
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Shutdown => {}
        }
    }

    fn on_monitor_event(&mut self, event: MonitorEvent) {
        if self.monitor.armed_epoch() != Some(event.epoch()) {
            debug!(epoch = event.epoch(), "stale monitor event dropped");
            return;
        }
        match event {
            MonitorEvent::Fire(fire) => {
                debug!(epoch = fire.epoch, seq = fire.seq, loudness_db = fire.loudness_db, "fire received");
                let effects = self.machine.on_fire(Instant::now());
                self.apply(effects);
            }
            MonitorEvent::Unavailable { detail, .. } => {
                warn!("monitoring unavailable: {detail}");
                self.monitor.disarm();
                self.monitor_unavailable = true;
                self.notify(SessionEvent::MonitorUnavailable { detail });
                self.publish_status();
            }
            MonitorEvent::PermissionDenied { .. } => {
                warn!("microphone permission denied by the platform");
                self.monitor.disarm();
                self.permission_denied = true;
                self.notify(SessionEvent::PermissionDenied);
                self.publish_status();
            }
        }
    }

    fn on_timer(&mut self, fired: TimerFired) {
        if !self.timers.accept(fired) {
            debug!(key = ?fired.key, "stale timer dropped");
            return;
        }
        match fired.key {
            TimerKey::ArmMonitor => {
                self.arm_monitor();
                self.publish_status();
            }
            TimerKey::EndOfSet => {
                let effects = self.machine.end_of_set();
                self.apply(effects);
            }
            TimerKey::CountdownTick => {
                let effects = self.machine.tick();
                self.apply(effects);
            }
            TimerKey::ResumeCue => {
                self.play_resume_cue();
                self.publish_status();
            }
            TimerKey::CompletionSignal => {
                info!("finish cue played, session ended");
                self.notify(SessionEvent::Ended {
                    reason: EndReason::Completed,
                });
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let timings = *self.machine.timings();
        for effect in effects {
            match effect {
                Effect::CancelPending => {
                    self.timers.cancel_all();
                    self.cues.cancel_pending();
                }
                Effect::StopPlayback => self.cues.stop_all(),
                Effect::Cues { slot, delay, cues } => self.cues.schedule(slot, delay, cues),
                Effect::QueueCues { slot, cues } => self.cues.enqueue(slot, cues),
                Effect::ArmMonitor { delay } if delay.is_zero() => self.arm_monitor(),
                Effect::ArmMonitor { delay } => self.timers.schedule(TimerKey::ArmMonitor, delay),
                Effect::DisarmMonitor => {
                    self.timers.cancel(TimerKey::ArmMonitor);
                    self.monitor.disarm();
                }
                Effect::ScheduleEndOfSet { delay } => self.timers.schedule(TimerKey::EndOfSet, delay),
                Effect::ScheduleTick => {
                    self.timers.schedule(TimerKey::CountdownTick, timings.countdown_tick)
                }
                Effect::SaveSnapshot(snapshot) => save_snapshot(self.store.as_ref(), &snapshot),
                Effect::DeleteSnapshot => delete_snapshot(self.store.as_ref()),
                Effect::Finish => {
                    let took = self.cues.emit(Cue::Finish);
                    self.timers.schedule(TimerKey::CompletionSignal, took);
                }
                Effect::ResumeCue { delay, arm_after } => {
                    self.resume_arms_monitor = arm_after;
                    if delay.is_zero() {
                        self.play_resume_cue();
                    } else {
                        self.timers.schedule(TimerKey::ResumeCue, delay);
                    }
                }
                Effect::Notify(event) => self.notify(event),
            }
        }
        self.publish_status();
    }

    fn play_resume_cue(&mut self) {
        let took = self.cues.emit(Cue::Resume);
        if self.resume_arms_monitor {
            let buffer = self.machine.timings().sequence_buffer;
            self.timers.schedule(TimerKey::ArmMonitor, took + buffer);
        }
    }

    fn arm_monitor(&mut self) {
        let state = self.machine.state();
        if self.machine.phase() != SessionPhase::Active || state.reps_remaining == 0 {
            return;
        }
        if self.permission_denied {
            debug!("not arming: microphone permission denied");
            return;
        }
        match self.monitor.arm() {
            Ok(epoch) => {
                self.monitor_unavailable = false;
                debug!(epoch, set = state.current_set, "monitor armed");
            }
            Err(e) => {
                warn!("failed to arm monitor: {e}");
                self.monitor_unavailable = true;
                self.notify(SessionEvent::MonitorUnavailable {
                    detail: e.to_string(),
                });
            }
        }
    }

    async fn check_permission(&mut self) {
        let granted = ensure_granted(self.permission.as_ref()).await;
        self.permission_denied = !granted;
        if !granted {
            warn!("microphone permission denied; counting disabled");
            self.notify(SessionEvent::PermissionDenied);
        }
    }

    fn notify(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn publish_status(&self) {
        let status = SessionStatus {
            monitoring: self.monitor.armed_epoch().is_some(),
            permission_denied: self.permission_denied,
            monitor_unavailable: self.monitor_unavailable,
            ..self.machine.status()
        };
        let mut current = self.status.lock();
        if *current != status {
            *current = status.clone();
            drop(current);
            self.notify(SessionEvent::StateChanged { status });
        }
    }
}
