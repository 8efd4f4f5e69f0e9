//! RMS-based gain normalization for caller audio.

/// Normalized RMS (full scale = 1.0) that quiet audio is lifted toward.
pub const TARGET_RMS: f64 = 0.15;
/// Below this the batch is treated as line noise and left alone.
pub const MIN_RMS: f64 = 0.001;
/// Upper bound on the applied gain.
pub const MAX_GAIN: f64 = 2.0;

/// Normalized RMS of a sample buffer, 0.0 for an empty one.
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_squares / samples.len() as f64).sqrt() / 32768.0
}

/// Lift quiet audio toward [`TARGET_RMS`] in place; returns the gain applied.
///
/// Buffers at or above the target, or under the noise floor, are untouched
/// (gain 1.0).
pub fn normalize_gain(samples: &mut [i16]) -> f64 {
    let level = rms(samples);
    if level >= TARGET_RMS || level <= MIN_RMS {
        return 1.0;
    }
    let gain = (TARGET_RMS / level).min(MAX_GAIN);
    for s in samples.iter_mut() {
        let scaled = (f64::from(*s) * gain).round();
        *s = scaled.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
    }
    gain
}
