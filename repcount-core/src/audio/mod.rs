//! Microphone capture via cpal.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not allocate (beyond sizing the mix buffer on the first callback),
//! block on a lock or perform I/O. Samples are mixed down to mono f32 and
//! pushed into the SPSC ring, whose `push_slice` is lock-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on Windows and macOS, so `AudioCapture` must be
//! created and dropped on the same thread. The monitor opens it inside
//! `spawn_blocking` and drops it there when the detection loop exits.

pub mod device;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use crate::{
    buffering::AudioProducer,
    error::{RepCountError, Result},
};

/// Handle to an open input stream. Dropping it releases the device.
///
/// Not `Send`: create and drop on the same OS thread.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    running: Arc<AtomicBool>,
    /// Samples the callback could not push because the ring was full.
    dropped: Arc<AtomicUsize>,
    pub sample_rate: u32,
    pub device_name: String,
}

impl AudioCapture {
    /// Open `preferred_device_name` if present, otherwise the default input,
    /// otherwise the first input the host lists.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        let device = select_device(preferred_device_name)?;
        let device_name = device.name().unwrap_or_default();

        let supported = device.default_input_config().map_err(|e| {
            if is_permission_error(&e.to_string()) {
                RepCountError::PermissionDenied
            } else {
                RepCountError::AudioDevice(e.to_string())
            }
        })?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(device = %device_name, sample_rate, channels, "opening input device");

        let config = StreamConfig {
            channels,
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        let dropped = Arc::new(AtomicUsize::new(0));
        let tap = MonoTap {
            producer,
            running: Arc::clone(&running),
            dropped: Arc::clone(&dropped),
            channels: usize::from(channels.max(1)),
            mix: Vec::new(),
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, tap, |s| s),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, tap, |s| f32::from(s) / 32768.0),
            SampleFormat::U8 => {
                build_stream::<u8>(&device, &config, tap, |s| (f32::from(s) - 128.0) / 128.0)
            }
            fmt => {
                return Err(RepCountError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| RepCountError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            dropped,
            sample_rate,
            device_name,
        })
    }

    /// Stub when the `audio-cpal` feature is disabled.
    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(RepCountError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn dropped_samples(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(feature = "audio-cpal")]
fn select_device(preferred_name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    if let Some(preferred_name) = preferred_name {
        match host.input_devices() {
            Ok(mut devices) => {
                if let Some(device) =
                    devices.find(|d| d.name().map(|n| n == preferred_name).unwrap_or(false))
                {
                    return Ok(device);
                }
                warn!("preferred input device '{preferred_name}' not found, falling back");
            }
            Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
        }
    }

    if let Some(default) = host.default_input_device() {
        return Ok(default);
    }
    let mut devices = host
        .input_devices()
        .map_err(|e| RepCountError::AudioDevice(e.to_string()))?;
    let fallback = devices.next().ok_or(RepCountError::NoDefaultInputDevice)?;
    warn!("no default input device, falling back to first available input");
    Ok(fallback)
}

/// Host backends report a missing microphone grant as a generic backend error.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
fn is_permission_error(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("permission") || lowered.contains("access denied") || lowered.contains("not authorized")
}

/// Callback-side state: mixes interleaved input to mono and pushes it into the ring.
#[cfg(feature = "audio-cpal")]
struct MonoTap {
    producer: AudioProducer,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
    channels: usize,
    mix: Vec<f32>,
}

#[cfg(feature = "audio-cpal")]
impl MonoTap {
    fn push<T: Copy>(&mut self, data: &[T], to_f32: impl Fn(T) -> f32) {
        if !self.running.load(Ordering::Relaxed) {
            return;
        }
        let frames = data.len() / self.channels;
        if self.mix.len() != frames {
            self.mix.resize(frames, 0.0);
        }
        for (out, frame) in self.mix.iter_mut().zip(data.chunks_exact(self.channels)) {
            let sum: f32 = frame.iter().map(|s| to_f32(*s)).sum();
            *out = sum / self.channels as f32;
        }
        let written = self.producer.push_slice(&self.mix);
        if written < frames {
            self.dropped.fetch_add(frames - written, Ordering::Relaxed);
        }
    }
}

#[cfg(feature = "audio-cpal")]
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut tap: MonoTap,
    to_f32: fn(T) -> f32,
) -> Result<Stream>
where
    T: cpal::SizedSample + Copy + Send + 'static,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _info| tap.push(data, to_f32),
            |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| {
            if is_permission_error(&e.to_string()) {
                RepCountError::PermissionDenied
            } else {
                RepCountError::AudioStream(e.to_string())
            }
        })
}

#[cfg(test)]
mod tests {
    use super::is_permission_error;

    #[test]
    fn recognises_permission_failures() {
        assert!(is_permission_error("Permission denied (os error 13)"));
        assert!(is_permission_error("Access denied by the system"));
        assert!(!is_permission_error("device busy"));
    }
}
