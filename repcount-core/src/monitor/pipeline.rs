//! Blocking detection loop.
//!
//! ## Stages (per frame)
//!
//! ```text
//! 1. Drain the ring until one FRAME_SIZE frame is filled
//! 2. Level Meter → loudness (dBFS)
//! 3. FireDetector::evaluate → fired?
//! 4. Broadcast LevelEvent (when enabled)
//! 5. On fire: try_send MonitorEvent::Fire into the control channel
//! ```
//!
//! Runs inside `spawn_blocking` so the Tokio executor stays free for the
//! session controller. Nothing here touches session state.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, OnceLock,
};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::{FireEvent, MonitorEvent};
use crate::{
    buffering::{AudioConsumer, Consumer},
    ipc::events::LevelEvent,
    trigger::{measure, FireDetector},
};

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub samples_in: AtomicUsize,
    pub frames_measured: AtomicUsize,
    pub fires_emitted: AtomicUsize,
    /// Fires lost because the control channel was full or closed.
    pub fires_dropped: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.frames_measured.store(0, Ordering::Relaxed);
        self.fires_emitted.store(0, Ordering::Relaxed);
        self.fires_dropped.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            frames_measured: self.frames_measured.load(Ordering::Relaxed),
            fires_emitted: self.fires_emitted.load(Ordering::Relaxed),
            fires_dropped: self.fires_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub samples_in: usize,
    pub frames_measured: usize,
    pub fires_emitted: usize,
    pub fires_dropped: usize,
}

/// Everything one detection run owns, moved into the blocking thread.
pub struct PipelineContext {
    pub detector: Box<dyn FireDetector>,
    pub consumer: AudioConsumer,
    /// Cleared by `disarm`; the loop exits at the next check.
    pub running: Arc<AtomicBool>,
    pub events_tx: mpsc::Sender<MonitorEvent>,
    pub level_tx: Option<broadcast::Sender<LevelEvent>>,
    pub epoch: u64,
    pub frame_size: usize,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

const DEFAULT_SLEEP_EMPTY_MS: u64 = 5;
const LEVEL_LOG_EVERY: u64 = 50;

/// Run until `ctx.running` is cleared. The detector is reset on entry and exit.
pub fn run(mut ctx: PipelineContext) {
    info!(epoch = ctx.epoch, "detection loop started");
    ctx.detector.reset();

    let mut frame = vec![0f32; ctx.frame_size.max(1)];
    let mut filled = 0usize;
    let mut seq = 0u64;

    while ctx.running.load(Ordering::Acquire) {
        let n = ctx.consumer.pop_slice(&mut frame[filled..]);
        if n == 0 {
            std::thread::sleep(Duration::from_millis(empty_sleep_ms()));
            continue;
        }
        ctx.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);
        filled += n;
        if filled < frame.len() {
            continue;
        }
        filled = 0;

        let loudness_db = measure(&frame);
        let fired = ctx.detector.evaluate(loudness_db);
        seq = seq.saturating_add(1);
        ctx.diagnostics.frames_measured.fetch_add(1, Ordering::Relaxed);

        if let Some(level_tx) = &ctx.level_tx {
            let _ = level_tx.send(LevelEvent {
                seq,
                loudness_db,
                threshold_db: ctx.detector.threshold_db(),
                fired,
            });
        }

        if seq % LEVEL_LOG_EVERY == 0 {
            debug!(
                epoch = ctx.epoch,
                loudness_db = format_args!("{loudness_db:.1}"),
                threshold_db = format_args!("{:.1}", ctx.detector.threshold_db()),
                "audio level check"
            );
        }

        if fired {
            // Disarmed while this frame was being measured: the tap is gone.
            if !ctx.running.load(Ordering::Acquire) {
                break;
            }
            emit_fire(&ctx, seq, loudness_db);
        }
    }

    ctx.detector.reset();
    info!(epoch = ctx.epoch, frames = seq, "detection loop stopped");
}

fn emit_fire(ctx: &PipelineContext, seq: u64, loudness_db: f32) {
    let event = MonitorEvent::Fire(FireEvent {
        epoch: ctx.epoch,
        seq,
        loudness_db,
        detected_at: Instant::now(),
    });
    match ctx.events_tx.try_send(event) {
        Ok(()) => {
            ctx.diagnostics.fires_emitted.fetch_add(1, Ordering::Relaxed);
            debug!(epoch = ctx.epoch, seq, loudness_db, "fire");
        }
        Err(e) => {
            ctx.diagnostics.fires_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(epoch = ctx.epoch, seq, "dropping fire event: {e}");
        }
    }
}

fn empty_sleep_ms() -> u64 {
    static EMPTY_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    *EMPTY_SLEEP_MS.get_or_init(|| {
        std::env::var("REPCOUNT_PIPELINE_EMPTY_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_SLEEP_EMPTY_MS)
    })
}
