//! End-to-end workout scenarios against the session controller, with a
//! scripted monitor, a recording cue player and an in-memory store, on a
//! paused Tokio clock.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use repcount_core::cue::{Cue, CuePlayer};
use repcount_core::monitor::{FireEvent, Monitor, MonitorEvent};
use repcount_core::permission::{PermissionProvider, PermissionRequest, PermissionStatus};
use repcount_core::persist::{MemoryStore, SnapshotStore};
use repcount_core::session::{
    SessionController, SessionDeps, SessionHandle, SessionPhase, SessionTimings, WorkoutConfig,
    SNAPSHOT_KEY,
};
use repcount_core::{EndReason, RepCountError, Result, SessionEvent};
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;

/// Shared, ordered record of monitor calls and cue plays.
type Journal = Arc<Mutex<Vec<String>>>;

struct ScriptedMonitor {
    journal: Journal,
    armed: Arc<Mutex<Option<u64>>>,
    last_epoch: u64,
    fail_arm: bool,
}

impl Monitor for ScriptedMonitor {
    fn arm(&mut self) -> Result<u64> {
        if self.fail_arm {
            return Err(RepCountError::NoDefaultInputDevice);
        }
        let mut armed = self.armed.lock();
        if let Some(epoch) = *armed {
            return Ok(epoch);
        }
        self.last_epoch += 1;
        *armed = Some(self.last_epoch);
        self.journal.lock().push("arm".into());
        Ok(self.last_epoch)
    }

    fn disarm(&mut self) {
        if self.armed.lock().take().is_some() {
            self.journal.lock().push("disarm".into());
        }
    }

    fn armed_epoch(&self) -> Option<u64> {
        *self.armed.lock()
    }
}

/// Every cue has a one-second asset.
struct RecordingPlayer {
    journal: Journal,
}

impl CuePlayer for RecordingPlayer {
    fn play(&self, cue_id: &str) -> Duration {
        self.journal.lock().push(format!("cue:{cue_id}"));
        Duration::from_secs(1)
    }

    fn speak(&self, cue: &Cue) {
        self.journal.lock().push(format!("speak:{}", cue.id()));
    }

    fn stop_all(&self) {
        self.journal.lock().push("stop_all".into());
    }
}

struct FixedPermission(bool);

impl PermissionProvider for FixedPermission {
    fn status(&self) -> PermissionStatus {
        if self.0 {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }

    fn request(&self) -> PermissionRequest {
        let granted = self.0;
        Box::pin(async move { granted })
    }
}

struct Rig {
    handle: SessionHandle,
    fires: mpsc::Sender<MonitorEvent>,
    armed: Arc<Mutex<Option<u64>>>,
    journal: Journal,
    store: Arc<MemoryStore>,
    events: broadcast::Receiver<SessionEvent>,
}

struct RigOptions {
    store: Arc<MemoryStore>,
    permission: bool,
    fail_arm: bool,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            permission: true,
            fail_arm: false,
        }
    }
}

fn rig() -> Rig {
    rig_with(RigOptions::default())
}

fn rig_with(options: RigOptions) -> Rig {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let armed = Arc::new(Mutex::new(None));
    let (fires, monitor_events) = mpsc::channel(64);
    let deps = SessionDeps {
        monitor: Box::new(ScriptedMonitor {
            journal: Arc::clone(&journal),
            armed: Arc::clone(&armed),
            last_epoch: 0,
            fail_arm: options.fail_arm,
        }),
        monitor_events,
        player: Arc::new(RecordingPlayer {
            journal: Arc::clone(&journal),
        }),
        store: options.store.clone(),
        permission: Arc::new(FixedPermission(options.permission)),
    };
    let (handle, _task) = SessionController::spawn(deps, SessionTimings::default());
    let events = handle.subscribe();
    Rig {
        handle,
        fires,
        armed,
        journal,
        store: options.store,
        events,
    }
}

impl Rig {
    /// A loud sound on whatever tap is currently installed (epoch 0 if none).
    async fn fire(&self) {
        let epoch = self.armed.lock().unwrap_or(0);
        self.fire_with_epoch(epoch).await;
    }

    async fn fire_with_epoch(&self, epoch: u64) {
        self.fires
            .send(MonitorEvent::Fire(FireEvent {
                epoch,
                seq: 0,
                loudness_db: -3.0,
                detected_at: std::time::Instant::now(),
            }))
            .await
            .expect("controller is running");
        settle().await;
    }

    fn is_armed(&self) -> bool {
        self.armed.lock().is_some()
    }

    fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    async fn wait_for_rest(&self, seconds: u32) {
        for _ in 0..1_000 {
            let status = self.handle.status();
            if status.phase == SessionPhase::Resting && status.rest_seconds_remaining == seconds {
                return;
            }
            sleep(Duration::from_millis(100)).await;
        }
        panic!("rest countdown never reached {seconds}s");
    }
}

async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

fn config(reps: u32, sets: u32, rest: u32) -> WorkoutConfig {
    WorkoutConfig::new(reps, sets, rest).expect("valid config")
}

fn position(journal: &[String], entry: &str) -> usize {
    journal
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("{entry} missing from {journal:?}"))
}

#[tokio::test(start_paused = true)]
async fn five_spaced_fires_complete_a_single_set_workout() {
    let mut rig = rig();
    rig.handle.start(config(5, 1, 30)).await.expect("start");
    assert!(!rig.is_armed(), "monitoring must wait out the start grace");

    sleep(Duration::from_millis(3100)).await;
    assert!(rig.is_armed());

    for _ in 0..5 {
        rig.fire().await;
        sleep(Duration::from_millis(1500)).await;
    }
    sleep(Duration::from_secs(5)).await;

    let status = rig.handle.status();
    assert_eq!(status.phase, SessionPhase::Completed);
    assert_eq!(status.current_rep, 5);
    assert_eq!(status.reps_remaining, 0);
    assert!(!rig.store.contains(SNAPSHOT_KEY));

    let events = rig.drain_events();
    let reps = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::RepCounted { .. }))
        .count();
    assert_eq!(reps, 5);
    assert!(events.contains(&SessionEvent::Ended {
        reason: EndReason::Completed
    }));
    let journal = rig.journal();
    assert!(position(&journal, "cue:start") < position(&journal, "arm"));
    assert!(journal.contains(&"cue:finish".to_string()));
}

#[tokio::test(start_paused = true)]
async fn completion_is_signalled_only_after_finish_cue_duration() {
    let mut rig = rig();
    rig.handle.start(config(1, 1, 0)).await.expect("start");
    sleep(Duration::from_millis(3100)).await;
    rig.fire().await;
    sleep(Duration::from_millis(2600)).await;
    assert_eq!(rig.handle.status().phase, SessionPhase::Completed);
    assert!(!rig.drain_events().contains(&SessionEvent::Ended {
        reason: EndReason::Completed
    }));

    sleep(Duration::from_secs(1)).await;
    assert!(rig.drain_events().contains(&SessionEvent::Ended {
        reason: EndReason::Completed
    }));
}

#[tokio::test(start_paused = true)]
async fn rapid_fires_count_one_rep() {
    let rig = rig();
    rig.handle.start(config(10, 3, 60)).await.expect("start");
    sleep(Duration::from_millis(3100)).await;

    for _ in 0..5 {
        rig.fire().await;
        sleep(Duration::from_millis(200)).await;
    }

    let status = rig.handle.status();
    assert_eq!(status.current_rep, 1);
    assert_eq!(status.reps_remaining, 9);
}

#[tokio::test(start_paused = true)]
async fn countdown_does_not_run_while_paused() {
    let rig = rig();
    rig.handle.start(config(1, 2, 30)).await.expect("start");
    sleep(Duration::from_millis(3100)).await;
    rig.fire().await;

    rig.wait_for_rest(12).await;
    rig.handle.pause().await.expect("pause while resting");
    assert_eq!(rig.handle.status().phase, SessionPhase::Paused);

    sleep(Duration::from_secs(100)).await;
    let status = rig.handle.status();
    assert_eq!(status.phase, SessionPhase::Paused);
    assert_eq!(status.rest_seconds_remaining, 12);

    rig.handle.resume().await.expect("resume");
    let status = rig.handle.status();
    assert_eq!(status.phase, SessionPhase::Resting);
    assert_eq!(status.rest_seconds_remaining, 12);

    sleep(Duration::from_millis(1050)).await;
    assert_eq!(rig.handle.status().rest_seconds_remaining, 11);
}

#[tokio::test(start_paused = true)]
async fn monitoring_stops_before_end_of_set_sequence() {
    let rig = rig();
    rig.handle.start(config(2, 2, 30)).await.expect("start");
    sleep(Duration::from_millis(3100)).await;
    let epoch = rig.armed.lock().expect("armed after grace");

    rig.fire().await;
    sleep(Duration::from_millis(1400)).await;
    rig.fire().await;
    assert!(!rig.is_armed(), "final rep must disarm immediately");

    // Late fires from the removed tap, before Resting is entered.
    for _ in 0..3 {
        sleep(Duration::from_millis(600)).await;
        rig.fire_with_epoch(epoch).await;
    }
    assert_eq!(rig.handle.status().current_rep, 2);

    // End of set at +2.5 s, rest cue one cue-length plus buffer later.
    sleep(Duration::from_secs(2)).await;
    assert_eq!(rig.handle.status().phase, SessionPhase::Resting);
    let journal = rig.journal();
    let disarm = position(&journal, "disarm");
    assert!(disarm < position(&journal, "cue:set_complete"));
    assert!(position(&journal, "cue:set_complete") < position(&journal, "cue:rest"));
}

#[tokio::test(start_paused = true)]
async fn short_rest_plays_rest_cue_before_get_ready() {
    let rig = rig();
    rig.handle.start(config(1, 2, 11)).await.expect("start");
    sleep(Duration::from_millis(3100)).await;
    rig.fire().await;

    // 2.5 s end of set + 11 s rest + 0.3 s set cue.
    sleep(Duration::from_secs(15)).await;
    let journal = rig.journal();
    let set_complete = position(&journal, "cue:set_complete");
    let rest = position(&journal, "cue:rest");
    let get_ready = position(&journal, "cue:be_ready_next_set");
    assert!(set_complete < rest, "{journal:?}");
    assert!(rest < get_ready, "{journal:?}");
    assert!(get_ready < position(&journal, "cue:last_set"));
}

#[tokio::test(start_paused = true)]
async fn next_set_rearms_and_announces_last_set() {
    let rig = rig();
    rig.handle.start(config(1, 2, 3)).await.expect("start");
    sleep(Duration::from_millis(3100)).await;
    rig.fire().await;

    // 2.5 s end of set + 3 s rest + 0.3 s set cue.
    sleep(Duration::from_secs(7)).await;
    let status = rig.handle.status();
    assert_eq!(status.phase, SessionPhase::Active);
    assert_eq!(status.current_set, 2);
    assert_eq!(status.reps_remaining, 1);
    assert!(rig.is_armed());
    assert!(rig.journal().contains(&"cue:last_set".to_string()));
}

#[tokio::test(start_paused = true)]
async fn stale_epoch_fire_is_ignored() {
    let rig = rig();
    rig.handle.start(config(5, 1, 30)).await.expect("start");
    sleep(Duration::from_millis(3100)).await;

    rig.fire_with_epoch(42).await;
    assert_eq!(rig.handle.status().current_rep, 0);
    rig.fire().await;
    assert_eq!(rig.handle.status().current_rep, 1);
}

#[tokio::test(start_paused = true)]
async fn quit_ends_without_finish_cue_and_clears_snapshot() {
    let mut rig = rig();
    rig.handle.start(config(5, 3, 30)).await.expect("start");
    sleep(Duration::from_millis(3100)).await;
    rig.fire().await;
    assert!(rig.store.contains(SNAPSHOT_KEY));

    rig.handle.quit().await.expect("quit");
    sleep(Duration::from_secs(10)).await;

    assert_eq!(rig.handle.status().phase, SessionPhase::Idle);
    assert!(!rig.is_armed());
    assert!(!rig.store.contains(SNAPSHOT_KEY));
    assert!(!rig.journal().contains(&"cue:finish".to_string()));
    assert!(rig.drain_events().contains(&SessionEvent::Ended {
        reason: EndReason::Quit
    }));
}

#[tokio::test(start_paused = true)]
async fn pause_cancels_pending_rep_cue() {
    let rig = rig();
    rig.handle.start(config(5, 1, 30)).await.expect("start");
    sleep(Duration::from_millis(3100)).await;
    rig.fire().await;
    rig.handle.pause().await.expect("pause");
    sleep(Duration::from_secs(5)).await;

    let journal = rig.journal();
    assert!(!journal.contains(&"cue:1".to_string()));
    assert!(journal.contains(&"cue:stop_workout_by_user".to_string()));
    assert!(!rig.is_armed());
}

#[tokio::test(start_paused = true)]
async fn resume_active_arms_after_resume_cue() {
    let rig = rig();
    rig.handle.start(config(5, 1, 30)).await.expect("start");
    sleep(Duration::from_millis(3100)).await;
    rig.handle.pause().await.expect("pause");
    rig.handle.resume().await.expect("resume");
    assert!(!rig.is_armed());

    // 1 s cue + 0.2 s buffer.
    sleep(Duration::from_millis(1100)).await;
    assert!(!rig.is_armed());
    sleep(Duration::from_millis(200)).await;
    assert!(rig.is_armed());
}

#[tokio::test(start_paused = true)]
async fn crashed_session_restores_from_store() {
    let store = Arc::new(MemoryStore::new());
    let first = rig_with(RigOptions {
        store: Arc::clone(&store),
        ..RigOptions::default()
    });
    first.handle.start(config(8, 3, 60)).await.expect("start");
    sleep(Duration::from_millis(3100)).await;
    for _ in 0..3 {
        first.fire().await;
        sleep(Duration::from_millis(1500)).await;
    }
    let before = first.handle.status();
    first.handle.shutdown().await;

    let second = rig_with(RigOptions {
        store: Arc::clone(&store),
        ..RigOptions::default()
    });
    let snapshot = second.handle.pending_snapshot().expect("saved session");
    second.handle.restore(snapshot).await.expect("restore");

    let after = second.handle.status();
    assert_eq!(after.phase, SessionPhase::Active);
    assert_eq!(after.current_set, before.current_set);
    assert_eq!(after.current_rep, 3);
    assert_eq!(after.reps_remaining, 5);

    // 0.5 s restore delay + 1 s resume cue + 0.2 s buffer.
    sleep(Duration::from_millis(1800)).await;
    assert!(second.is_armed());
    let journal = second.journal();
    assert_eq!(journal.first().map(String::as_str), Some("cue:resume_workout"));
}

#[tokio::test(start_paused = true)]
async fn malformed_snapshot_is_not_offered() {
    let store = Arc::new(MemoryStore::new());
    store
        .save(SNAPSHOT_KEY, br#"{"version":1,"phase":"paused"}"#)
        .expect("seed store");
    let rig = rig_with(RigOptions {
        store: Arc::clone(&store),
        ..RigOptions::default()
    });
    assert!(rig.handle.pending_snapshot().is_none());
    assert!(!store.contains(SNAPSHOT_KEY));
}

#[tokio::test(start_paused = true)]
async fn wrong_phase_commands_are_rejected() {
    let rig = rig();
    assert!(matches!(
        rig.handle.pause().await,
        Err(RepCountError::InvalidTransition { op: "pause", .. })
    ));
    rig.handle.start(config(5, 1, 30)).await.expect("start");
    assert!(rig.handle.start(config(5, 1, 30)).await.is_err());
    assert!(rig.handle.resume().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn denied_permission_keeps_manual_control() {
    let mut rig = rig_with(RigOptions {
        permission: false,
        ..RigOptions::default()
    });
    rig.handle.start(config(2, 1, 30)).await.expect("start");
    sleep(Duration::from_secs(4)).await;

    assert!(!rig.is_armed());
    let status = rig.handle.status();
    assert!(status.permission_denied);
    assert!(!status.monitoring);
    assert!(rig.drain_events().contains(&SessionEvent::PermissionDenied));

    rig.handle.complete_rep().await.expect("manual rep");
    assert_eq!(rig.handle.status().current_rep, 1);
}

#[tokio::test(start_paused = true)]
async fn unavailable_device_is_reported_not_fatal() {
    let mut rig = rig_with(RigOptions {
        fail_arm: true,
        ..RigOptions::default()
    });
    rig.handle.start(config(2, 1, 30)).await.expect("start");
    sleep(Duration::from_secs(4)).await;

    assert!(rig.handle.status().monitor_unavailable);
    assert!(rig
        .drain_events()
        .iter()
        .any(|e| matches!(e, SessionEvent::MonitorUnavailable { .. })));
    rig.handle.quit().await.expect("quit still works");
}
