//! Microphone monitoring: the tap that turns live audio into fire events.
//!
//! ## Lifecycle
//!
//! ```text
//! MicMonitor::new()          → (monitor, events_rx)
//!     └─► arm()              → new epoch, fresh running flag, detection thread spawned
//!         └─► disarm()       → running=false; callback and loop stop producing
//! ```
//!
//! `arm()` is idempotent while armed and never blocks: the device is opened
//! on the detection thread (`cpal::Stream` is `!Send`), and an open failure
//! comes back on the event channel as `MonitorEvent::Unavailable`.
//!
//! Every fire carries the epoch of the arm that produced it. A fire from an
//! earlier arm can still be sitting in the channel after `disarm()`; the
//! consumer compares epochs and drops it.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::{
    audio::AudioCapture,
    buffering::{create_audio_ring, FRAME_SIZE},
    error::{RepCountError, Result},
    ipc::events::LevelEvent,
    trigger::{HysteresisTrigger, SharedTriggerConfig},
};

pub use pipeline::{DiagnosticsSnapshot, PipelineDiagnostics};

/// Capacity of the audio → control channel. A full channel drops fires.
pub const EVENT_CHANNEL_CAP: usize = 64;

const LEVEL_BROADCAST_CAP: usize = 256;

/// Explicit audio-session settings handed to the monitor at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSessionConfig {
    pub preferred_input_device: Option<String>,
    /// Samples per loudness measurement.
    pub frame_size: usize,
    /// Broadcast a `LevelEvent` per frame (calibration meters).
    pub emit_levels: bool,
}

impl Default for AudioSessionConfig {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            frame_size: FRAME_SIZE,
            emit_levels: false,
        }
    }
}

/// A loudness edge, produced on the detection thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FireEvent {
    pub epoch: u64,
    /// Frame number within the arm.
    pub seq: u64,
    pub loudness_db: f32,
    pub detected_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Fire(FireEvent),
    /// The input device could not be opened for this arm.
    Unavailable { epoch: u64, detail: String },
    /// The platform refused microphone access for this arm.
    PermissionDenied { epoch: u64 },
}

impl MonitorEvent {
    pub fn epoch(&self) -> u64 {
        match self {
            MonitorEvent::Fire(fire) => fire.epoch,
            MonitorEvent::Unavailable { epoch, .. } | MonitorEvent::PermissionDenied { epoch } => {
                *epoch
            }
        }
    }
}

/// Owner of the microphone tap, driven by the session controller.
pub trait Monitor: Send + 'static {
    /// Install the tap if not already installed. Returns the armed epoch.
    fn arm(&mut self) -> Result<u64>;

    /// Remove the tap. After this returns no new fire is produced for the old epoch.
    fn disarm(&mut self);

    /// Epoch of the installed tap, `None` when disarmed.
    fn armed_epoch(&self) -> Option<u64>;
}

struct ArmedTap {
    epoch: u64,
    running: Arc<AtomicBool>,
}

pub struct MicMonitor {
    audio: AudioSessionConfig,
    trigger: SharedTriggerConfig,
    events_tx: mpsc::Sender<MonitorEvent>,
    level_tx: broadcast::Sender<LevelEvent>,
    diagnostics: Arc<PipelineDiagnostics>,
    last_epoch: u64,
    armed: Option<ArmedTap>,
}

impl MicMonitor {
    pub fn new(
        audio: AudioSessionConfig,
        trigger: SharedTriggerConfig,
    ) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAP);
        let (level_tx, _) = broadcast::channel(LEVEL_BROADCAST_CAP);
        let monitor = Self {
            audio,
            trigger,
            events_tx,
            level_tx,
            diagnostics: Arc::new(PipelineDiagnostics::default()),
            last_epoch: 0,
            armed: None,
        };
        (monitor, events_rx)
    }

    /// Live loudness per frame. Only fed when `emit_levels` is set.
    pub fn subscribe_levels(&self) -> broadcast::Receiver<LevelEvent> {
        self.level_tx.subscribe()
    }

    pub fn trigger_config(&self) -> &SharedTriggerConfig {
        &self.trigger
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl Monitor for MicMonitor {
    fn arm(&mut self) -> Result<u64> {
        if let Some(armed) = &self.armed {
            return Ok(armed.epoch);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RepCountError::Other(anyhow::anyhow!("monitor needs a Tokio runtime: {e}")))?;

        self.last_epoch += 1;
        let epoch = self.last_epoch;
        let running = Arc::new(AtomicBool::new(true));
        self.diagnostics.reset();

        let (producer, consumer) = create_audio_ring();
        let preferred = self.audio.preferred_input_device.clone();
        let ctx = pipeline::PipelineContext {
            detector: Box::new(HysteresisTrigger::new(self.trigger.clone())),
            consumer,
            running: Arc::clone(&running),
            events_tx: self.events_tx.clone(),
            level_tx: self.audio.emit_levels.then(|| self.level_tx.clone()),
            epoch,
            frame_size: self.audio.frame_size,
            diagnostics: Arc::clone(&self.diagnostics),
        };

        runtime.spawn_blocking(move || {
            // Opened on this thread: the stream must be dropped where it was created.
            let capture = match AudioCapture::open(producer, Arc::clone(&ctx.running), preferred.as_deref()) {
                Ok(capture) => capture,
                Err(e) => {
                    ctx.running.store(false, Ordering::Release);
                    warn!(epoch, "failed to open input device: {e}");
                    let event = match e {
                        RepCountError::PermissionDenied => MonitorEvent::PermissionDenied { epoch },
                        other => MonitorEvent::Unavailable {
                            epoch,
                            detail: other.to_string(),
                        },
                    };
                    let _ = ctx.events_tx.blocking_send(event);
                    return;
                }
            };
            info!(epoch, device = %capture.device_name, sample_rate = capture.sample_rate, "monitoring");
            pipeline::run(ctx);
            capture.stop();
            if capture.dropped_samples() > 0 {
                warn!(epoch, dropped = capture.dropped_samples(), "ring overruns during arm");
            }
        });

        self.armed = Some(ArmedTap { epoch, running });
        Ok(epoch)
    }

    fn disarm(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.running.store(false, Ordering::Release);
            info!(epoch = armed.epoch, "monitoring stopped");
        }
    }

    fn armed_epoch(&self) -> Option<u64> {
        self.armed.as_ref().map(|a| a.epoch)
    }
}

impl Drop for MicMonitor {
    fn drop(&mut self) {
        self.disarm();
    }
}
