use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use repcount_core::buffering::{create_audio_ring, Producer, FRAME_SIZE};
use repcount_core::ipc::events::LevelEvent;
use repcount_core::monitor::{pipeline, MonitorEvent};
use repcount_core::trigger::{HysteresisTrigger, Preset, SharedTriggerConfig, TriggerConfig};
use tokio::sync::{broadcast, mpsc};

const SAMPLE_RATE: usize = 16_000;

struct Running {
    running: Arc<AtomicBool>,
    events_rx: mpsc::Receiver<MonitorEvent>,
    levels_rx: broadcast::Receiver<LevelEvent>,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
    thread: thread::JoinHandle<()>,
}

fn start_pipeline(samples: &[f32], trigger: SharedTriggerConfig) -> Running {
    let (mut producer, consumer) = create_audio_ring();
    assert_eq!(producer.push_slice(samples), samples.len());

    let running = Arc::new(AtomicBool::new(true));
    let (events_tx, events_rx) = mpsc::channel(64);
    let (level_tx, levels_rx) = broadcast::channel(4096);
    let diagnostics = Arc::new(pipeline::PipelineDiagnostics::default());

    let ctx = pipeline::PipelineContext {
        detector: Box::new(HysteresisTrigger::new(trigger)),
        consumer,
        running: Arc::clone(&running),
        events_tx,
        level_tx: Some(level_tx),
        epoch: 1,
        frame_size: FRAME_SIZE,
        diagnostics: Arc::clone(&diagnostics),
    };
    let thread = thread::spawn(move || pipeline::run(ctx));
    Running {
        running,
        events_rx,
        levels_rx,
        diagnostics,
        thread,
    }
}

fn recv_fire_with_timeout(rx: &mut mpsc::Receiver<MonitorEvent>, timeout: Duration) -> MonitorEvent {
    let start = Instant::now();
    loop {
        match rx.try_recv() {
            Ok(event) => return event,
            Err(mpsc::error::TryRecvError::Empty) => {
                if start.elapsed() >= timeout {
                    panic!("timed out waiting for fire event");
                }
                thread::sleep(Duration::from_millis(2));
            }
            Err(mpsc::error::TryRecvError::Disconnected) => panic!("fire channel closed unexpectedly"),
        }
    }
}

fn wait_for_frames(diagnostics: &pipeline::PipelineDiagnostics, frames: usize) {
    let start = Instant::now();
    while diagnostics.snapshot().frames_measured < frames {
        assert!(start.elapsed() < Duration::from_secs(5), "pipeline stalled");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn first_fire_latency_under_100ms() {
    let loud = vec![0.8f32; FRAME_SIZE];
    let mut rig = start_pipeline(&loud, SharedTriggerConfig::default());

    let start = Instant::now();
    let event = recv_fire_with_timeout(&mut rig.events_rx, Duration::from_secs(2));
    let elapsed = start.elapsed();

    rig.running.store(false, Ordering::SeqCst);
    rig.thread.join().expect("pipeline thread panicked");

    let MonitorEvent::Fire(fire) = event else {
        panic!("expected a fire, got {event:?}");
    };
    assert_eq!(fire.epoch, 1);
    assert!(
        elapsed < Duration::from_millis(100),
        "fire latency too high: {elapsed:?} (target < 100ms)"
    );
}

#[test]
fn three_seconds_of_sustained_shout_fires_exactly_once() {
    // 3 s at 16 kHz, never dropping below the reset level.
    let shout = vec![0.5f32; SAMPLE_RATE * 3];
    let frames = shout.len() / FRAME_SIZE;
    let mut rig = start_pipeline(&shout, SharedTriggerConfig::default());
    wait_for_frames(&rig.diagnostics, frames);

    rig.running.store(false, Ordering::SeqCst);
    rig.thread.join().expect("pipeline thread panicked");

    assert!(matches!(rig.events_rx.try_recv(), Ok(MonitorEvent::Fire(_))));
    assert!(rig.events_rx.try_recv().is_err(), "sustained sound fired twice");
    assert_eq!(rig.diagnostics.snapshot().fires_emitted, 1);
}

#[test]
fn drop_below_hysteresis_between_bursts_rearms() {
    let mut samples = Vec::new();
    for _ in 0..5 {
        samples.extend(std::iter::repeat(0.8f32).take(FRAME_SIZE * 3));
        samples.extend(std::iter::repeat(0.0f32).take(FRAME_SIZE * 3));
    }
    let frames = samples.len() / FRAME_SIZE;
    let mut rig = start_pipeline(&samples, SharedTriggerConfig::default());
    wait_for_frames(&rig.diagnostics, frames);

    rig.running.store(false, Ordering::SeqCst);
    rig.thread.join().expect("pipeline thread panicked");

    let mut seqs = Vec::new();
    while let Ok(MonitorEvent::Fire(fire)) = rig.events_rx.try_recv() {
        seqs.push(fire.seq);
    }
    assert_eq!(seqs, vec![1, 7, 13, 19, 25]);
}

#[test]
fn level_events_report_threshold_and_fire_flag() {
    let trigger = SharedTriggerConfig::new(TriggerConfig::from_preset(Preset::QuietRoom, 2.0));
    let mut samples = vec![0.0f32; FRAME_SIZE];
    samples.extend(std::iter::repeat(0.8f32).take(FRAME_SIZE));
    let mut rig = start_pipeline(&samples, trigger);
    wait_for_frames(&rig.diagnostics, 2);

    rig.running.store(false, Ordering::SeqCst);
    rig.thread.join().expect("pipeline thread panicked");

    let silent = rig.levels_rx.try_recv().expect("first level event");
    let loud = rig.levels_rx.try_recv().expect("second level event");
    assert_eq!(silent.seq, 1);
    assert!(!silent.fired);
    assert!(loud.fired);
    assert!((loud.threshold_db - (-28.0)).abs() < 1e-4);
}
