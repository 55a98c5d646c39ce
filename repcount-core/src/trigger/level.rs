//! Level meter: one loudness value (dBFS) per audio frame.

/// Returned when a frame has no energy (log of zero).
pub const SILENCE_DB: f32 = -160.0;

/// Root-mean-square of a sample slice. Empty input has zero energy.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Measure a frame's loudness as `20 * log10(rms)`, or `SILENCE_DB` when not finite.
pub fn measure(frame: &[f32]) -> f32 {
    let db = 20.0 * rms(frame).log10();
    if db.is_finite() {
        db
    } else {
        SILENCE_DB
    }
}
