//! Narrowband ↔ wideband rate conversion for the two legs of a call.

/// Upsample 8 kHz → 24 kHz.
///
/// Each input sample yields three outputs: the sample itself, its midpoint
/// with the previous sample, and a 75/25 blend toward the next one.
pub fn upsample_8k_to_24k(input: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(input.len() * 3);
    for (i, &sample) in input.iter().enumerate() {
        let prev = if i > 0 { input[i - 1] } else { sample };
        let next = input.get(i + 1).copied().unwrap_or(sample);

        let mid = 0.5 * f32::from(prev) + 0.5 * f32::from(sample);
        let forward = 0.75 * f32::from(sample) + 0.25 * f32::from(next);

        out.push(sample);
        out.push(clamp_i16(mid.round()));
        out.push(clamp_i16(forward.round()));
    }
    out
}

/// Downsample 24 kHz → 8 kHz by linear interpolation at fractional source
/// positions.
pub fn downsample_24k_to_8k(input: &[i16]) -> Vec<i16> {
    const RATIO: f64 = 24_000.0 / 8_000.0;
    let out_len = input.len() / 3;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * RATIO;
        let idx = pos.floor() as usize;
        let frac = pos - idx as f64;
        let sample = match (input.get(idx), input.get(idx + 1)) {
            (Some(&a), Some(&b)) => {
                let v = f64::from(a) * (1.0 - frac) + f64::from(b) * frac;
                clamp_i16(v.round() as f32)
            }
            (Some(&a), None) => a,
            _ => input.last().copied().unwrap_or(0),
        };
        out.push(sample);
    }
    out
}

fn clamp_i16(v: f32) -> i16 {
    v.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}
