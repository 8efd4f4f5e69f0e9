//! G.711 μ-law companding.
//!
//! Decode uses the segment table inversion; encode uses a continuous
//! logarithmic curve quantized to exponent/mantissa. The two are not exact
//! inverses: loud codes survive a decode→encode trip within one step, quiet
//! codes may drift a few steps and anything under the silence threshold
//! collapses to [`MULAW_SILENCE`].

/// Canonical silence byte on the telephony leg.
pub const MULAW_SILENCE: u8 = 0x7F;

const PCM_MAX: i32 = 32767;
const MU: f64 = 255.0;
const BIAS: i32 = 33;
/// Magnitudes below this encode as silence.
const SILENCE_THRESHOLD: i32 = 50;
/// Headroom applied to synthesized speech before companding.
pub const OUTBOUND_ATTENUATION: f32 = 0.95;

/// Expand one μ-law byte into a 16-bit sample.
pub fn decode_mulaw(byte: u8) -> i16 {
    let m = !byte;
    let negative = m & 0x80 != 0;
    let exponent = u32::from((m & 0x70) >> 4);
    let mantissa = i32::from(m & 0x0F);
    let magnitude = if exponent == 0 {
        mantissa * 8 + 16
    } else {
        (1i32 << (exponent + 3)) * (mantissa + 16) - 128
    };
    // largest magnitude is 31616, always in range
    if negative {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Compress one 16-bit sample into a μ-law byte.
pub fn encode_mulaw(sample: i16) -> u8 {
    let s = i32::from(sample).clamp(-PCM_MAX, PCM_MAX);
    let sign = if s < 0 { 0x80 } else { 0 };
    let magnitude = s.abs();
    if magnitude < SILENCE_THRESHOLD {
        return MULAW_SILENCE;
    }

    let normalized = f64::from(magnitude + BIAS) / f64::from(PCM_MAX);
    let compressed = (1.0 + MU * normalized).ln() / (1.0 + MU).ln();
    let q = (compressed * 128.0).round() as i32;
    let exponent = (q / 16).min(7);
    let mantissa = (q - exponent * 16).min(15) & 0x0F;

    (!(sign | (exponent << 4) | mantissa) & 0xFF) as u8
}

pub fn decode_mulaw_buf(payload: &[u8]) -> Vec<i16> {
    payload.iter().map(|&b| decode_mulaw(b)).collect()
}

pub fn encode_mulaw_buf(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode_mulaw(s)).collect()
}

/// Encode with [`OUTBOUND_ATTENUATION`] applied first.
pub fn encode_pcm_attenuated(samples: &[i16]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| {
            let scaled = (f32::from(s) * OUTBOUND_ATTENUATION).floor();
            encode_mulaw(scaled.clamp(-(PCM_MAX as f32), PCM_MAX as f32) as i16)
        })
        .collect()
}

/// True when every byte is the silence code (or the payload is empty).
pub fn is_silence(payload: &[u8]) -> bool {
    payload.iter().all(|&b| b == MULAW_SILENCE)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Signed code position: sign from the inverted top bit, magnitude from
    /// the inverted low seven bits.
    fn code_index(code: u8) -> i32 {
        let v = !code;
        let mag = i32::from(v & 0x7F);
        if v & 0x80 != 0 {
            -mag
        } else {
            mag
        }
    }

    #[test]
    fn silence_code_decodes_near_zero() {
        assert_eq!(decode_mulaw(MULAW_SILENCE), -16);
        assert_eq!(decode_mulaw(0xFF), 16);
    }

    #[test]
    fn quiet_samples_encode_as_silence() {
        assert_eq!(encode_mulaw(0), MULAW_SILENCE);
        assert_eq!(encode_mulaw(49), MULAW_SILENCE);
        assert_eq!(encode_mulaw(-49), MULAW_SILENCE);
        assert_eq!(encode_mulaw(50), 0xF3);
        assert_eq!(encode_mulaw(-50), 0x73);
    }

    #[test]
    fn extremes_clamp_to_outer_codes() {
        assert_eq!(encode_mulaw(i16::MAX), 0x80);
        assert_eq!(encode_mulaw(i16::MIN), 0x00);
        assert_eq!(decode_mulaw(0x80), 31616);
        assert_eq!(decode_mulaw(0x00), -31616);
    }

    #[test]
    fn encoder_is_monotonic() {
        let mut prev = code_index(encode_mulaw(0));
        for s in 1..=i16::MAX {
            let idx = code_index(encode_mulaw(s));
            assert!(idx >= prev, "encode({s}) went backwards");
            prev = idx;
        }
    }

    #[test]
    fn loud_codes_round_trip_within_one_step() {
        for code in 0..=255u8 {
            let original = code_index(code);
            let drift = (code_index(encode_mulaw(decode_mulaw(code))) - original).abs();
            if original.abs() >= 80 {
                assert!(drift <= 1, "code {code:#04x} drifted {drift}");
            }
            assert!(drift <= 7, "code {code:#04x} drifted {drift}");
        }
    }

    #[test]
    fn round_trip_preserves_sign_above_quiet_segment() {
        for code in 0..=255u8 {
            let original = code_index(code);
            if original.abs() >= 16 {
                let back = code_index(encode_mulaw(decode_mulaw(code)));
                assert_eq!(original.signum(), back.signum(), "code {code:#04x}");
            }
        }
    }

    #[test]
    fn attenuated_encode_is_never_louder() {
        let samples = [32767i16, -32768, 12000, -12000, 400];
        let plain = encode_mulaw_buf(&samples);
        let soft = encode_pcm_attenuated(&samples);
        for (p, s) in plain.iter().zip(&soft) {
            assert!(code_index(*s).abs() <= code_index(*p).abs());
        }
    }

    #[test]
    fn silence_detection() {
        assert!(is_silence(&[]));
        assert!(is_silence(&[MULAW_SILENCE; 160]));
        assert!(!is_silence(&[MULAW_SILENCE, 0x12]));
    }
}
