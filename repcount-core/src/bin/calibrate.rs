//! Trigger calibration harness.
//!
//! Offline: run WAV fixtures through the level meter, hysteresis trigger and
//! rep debouncer and report what would have been counted.
//!
//! Live: arm the microphone for a few seconds and log loudness and fires.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use repcount_core::{
    buffering::FRAME_SIZE,
    monitor::{AudioSessionConfig, MicMonitor, Monitor, MonitorEvent},
    session::RepDebouncer,
    settings::{default_settings_path, load_settings},
    trigger::{measure, FireDetector, HysteresisTrigger, Preset, SharedTriggerConfig, SILENCE_DB},
    TriggerConfig,
};

#[derive(Debug)]
struct Args {
    fixtures_dir: Option<PathBuf>,
    live: bool,
    seconds: u64,
    preset: Option<Preset>,
    sensitivity_db: Option<f32>,
    device: Option<String>,
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileReport {
    file: String,
    sample_rate: u32,
    duration_secs: f64,
    frames: usize,
    peak_loudness_db: f32,
    raw_fires: usize,
    reps_accepted: usize,
    fire_times_secs: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    fixtures_dir: String,
    trigger: TriggerConfig,
    files: Vec<FileReport>,
}

const USAGE: &str = "Usage: calibrate [--fixtures <dir> | --live [--seconds <n>]] \
[--preset quiet_room|gym|noisy_venue] [--sensitivity <db>] [--device <name>] [--output <file.json>]";

fn parse_args() -> Result<Args> {
    let mut args = Args {
        fixtures_dir: None,
        live: false,
        seconds: 10,
        preset: None,
        sensitivity_db: None,
        device: None,
        output: None,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |name: &str| it.next().ok_or_else(|| anyhow!("missing value for {name}"));
        match arg.as_str() {
            "--fixtures" => args.fixtures_dir = Some(PathBuf::from(value("--fixtures")?)),
            "--live" => args.live = true,
            "--seconds" => {
                args.seconds = value("--seconds")?
                    .parse::<u64>()
                    .context("invalid value for --seconds")?
                    .clamp(1, 600);
            }
            "--preset" => {
                let raw = value("--preset")?;
                args.preset = Some(Preset::parse(&raw).ok_or_else(|| anyhow!("unknown preset '{raw}'"))?);
            }
            "--sensitivity" => {
                args.sensitivity_db = Some(
                    value("--sensitivity")?
                        .parse::<f32>()
                        .context("invalid value for --sensitivity")?,
                );
            }
            "--device" => args.device = Some(value("--device")?),
            "--output" => args.output = Some(PathBuf::from(value("--output")?)),
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}\n{USAGE}"),
        }
    }

    if args.live == args.fixtures_dir.is_some() {
        bail!("pass exactly one of --fixtures or --live\n{USAGE}");
    }
    Ok(args)
}

fn collect_wavs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            collect_wavs(&path, out)?;
        } else if path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.eq_ignore_ascii_case("wav"))
        {
            out.push(path);
        }
    }
    Ok(())
}

fn read_wav_mono_f32(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let max = ((1_i64 << (spec.bits_per_sample.max(1) - 1)) - 1).max(1) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<Result<_, _>>()?
        }
    };

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

fn analyse(samples: &[f32], sample_rate: u32, trigger: TriggerConfig) -> FileReport {
    let mut detector = HysteresisTrigger::new(SharedTriggerConfig::new(trigger));
    let mut debouncer = RepDebouncer::default();
    let origin = tokio::time::Instant::now();

    let mut peak = SILENCE_DB;
    let mut frames = 0usize;
    let mut fire_times_secs = Vec::new();
    let mut reps_accepted = 0usize;

    for (idx, frame) in samples.chunks_exact(FRAME_SIZE).enumerate() {
        frames += 1;
        let loudness = measure(frame);
        peak = peak.max(loudness);
        if detector.evaluate(loudness) {
            let at = (idx * FRAME_SIZE) as f64 / f64::from(sample_rate.max(1));
            fire_times_secs.push(at);
            if debouncer.on_fire(origin + Duration::from_secs_f64(at)) {
                reps_accepted += 1;
            }
        }
    }

    FileReport {
        file: String::new(),
        sample_rate,
        duration_secs: samples.len() as f64 / f64::from(sample_rate.max(1)),
        frames,
        peak_loudness_db: peak,
        raw_fires: fire_times_secs.len(),
        reps_accepted,
        fire_times_secs,
    }
}

fn run_offline(dir: &Path, trigger: TriggerConfig, output: Option<&Path>) -> Result<()> {
    if !dir.exists() {
        bail!("fixtures directory not found: {}", dir.display());
    }
    let mut wavs = Vec::new();
    collect_wavs(dir, &mut wavs)?;
    wavs.sort();
    if wavs.is_empty() {
        bail!("no .wav fixtures found in {}", dir.display());
    }
    info!(files = wavs.len(), threshold_db = trigger.threshold_db(), "calibrating");

    let mut files = Vec::with_capacity(wavs.len());
    for wav in &wavs {
        let (samples, sample_rate) =
            read_wav_mono_f32(wav).with_context(|| format!("decoding {}", wav.display()))?;
        let mut report = analyse(&samples, sample_rate, trigger);
        report.file = wav.strip_prefix(dir).unwrap_or(wav).display().to_string();
        info!(
            file = %report.file,
            peak_db = format_args!("{:.1}", report.peak_loudness_db),
            fires = report.raw_fires,
            reps = report.reps_accepted,
            "analysed"
        );
        files.push(report);
    }

    let report = Report {
        fixtures_dir: dir.display().to_string(),
        trigger,
        files,
    };
    let json = serde_json::to_string_pretty(&report)?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn run_live(seconds: u64, trigger: TriggerConfig, device: Option<String>) -> Result<()> {
    let audio = AudioSessionConfig {
        preferred_input_device: device,
        emit_levels: true,
        ..AudioSessionConfig::default()
    };
    let (mut monitor, mut events) = MicMonitor::new(audio, SharedTriggerConfig::new(trigger));
    let mut levels = monitor.subscribe_levels();
    let epoch = monitor.arm()?;
    let threshold_db = monitor.trigger_config().get().threshold_db();
    info!(epoch, seconds, threshold_db, "listening");

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    let mut fires = 0usize;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(event) = events.recv() => match event {
                MonitorEvent::Fire(fire) => {
                    fires += 1;
                    info!(seq = fire.seq, loudness_db = format_args!("{:.1}", fire.loudness_db), "FIRE");
                }
                MonitorEvent::Unavailable { detail, .. } => bail!("input device unavailable: {detail}"),
                MonitorEvent::PermissionDenied { .. } => bail!("microphone permission denied"),
            },
            level = levels.recv() => match level {
                Ok(level) if level.seq % 25 == 0 => {
                    info!(
                        loudness_db = format_args!("{:.1}", level.loudness_db),
                        threshold_db = format_args!("{:.1}", level.threshold_db),
                        "level"
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "level meter lagging"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    monitor.disarm();
    let diagnostics = monitor.diagnostics_snapshot();
    info!(fires, ?diagnostics, "done");
    println!("{}", serde_json::to_string_pretty(&diagnostics)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("repcount=info,calibrate=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let mut settings = load_settings(&default_settings_path());
    settings.apply_env_overrides();
    if let Some(preset) = args.preset {
        settings.preset = preset;
    }
    if let Some(db) = args.sensitivity_db {
        settings.sensitivity_db = db;
    }
    settings.normalize();
    let trigger = settings.trigger();
    let device = args.device.or(settings.preferred_input_device);

    match args.fixtures_dir {
        Some(dir) => tokio::task::spawn_blocking(move || run_offline(&dir, trigger, args.output.as_deref()))
            .await
            .map_err(|e| anyhow!("calibration task failed: {e}"))?,
        None => run_live(args.seconds, trigger, device).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(amplitude: f32, frames: usize) -> Vec<f32> {
        vec![amplitude; frames * FRAME_SIZE]
    }

    #[test]
    fn two_claps_inside_interval_count_once() {
        // 48 kHz: 1024 samples ≈ 21 ms per frame. Two bursts ~0.4 s apart.
        let mut samples = tone(0.9, 2);
        samples.extend(tone(0.0, 16));
        samples.extend(tone(0.9, 2));
        samples.extend(tone(0.0, 100));
        samples.extend(tone(0.9, 2));

        let report = analyse(&samples, 48_000, TriggerConfig::default());
        assert_eq!(report.raw_fires, 3);
        assert_eq!(report.reps_accepted, 2);
        assert!(report.peak_loudness_db > -1.0);
    }

    #[test]
    fn silence_never_fires() {
        let report = analyse(&tone(0.0, 50), 16_000, TriggerConfig::default());
        assert_eq!(report.raw_fires, 0);
        assert_eq!(report.peak_loudness_db, SILENCE_DB);
    }
}
