//! Transcoding strategy selected from the negotiated realtime audio format.

use serde::{Deserialize, Serialize};

use super::gain::normalize_gain;
use super::mulaw::{decode_mulaw_buf, encode_pcm_attenuated};
use super::resample::{downsample_24k_to_8k, upsample_8k_to_24k};

/// Telephony leg sample rate.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;
/// Realtime session PCM sample rate.
pub const WIDEBAND_SAMPLE_RATE: u32 = 24_000;

/// Audio format spoken on the realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// 24 kHz little-endian PCM16; full transcode on both legs.
    #[default]
    Pcm16,
    /// 8 kHz μ-law; bytes pass through untouched.
    G711Ulaw,
}

impl AudioFormat {
    /// Name used in `session.update`.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::G711Ulaw => "g711_ulaw",
        }
    }

    /// Bytes of realtime audio per second of speech.
    pub fn bytes_per_second(self) -> u32 {
        match self {
            Self::Pcm16 => WIDEBAND_SAMPLE_RATE * 2,
            Self::G711Ulaw => TELEPHONY_SAMPLE_RATE,
        }
    }

    /// Convert a realtime audio delta into 8 kHz μ-law for the RTP leg.
    pub fn to_telephony(self, delta: &[u8]) -> Vec<u8> {
        match self {
            Self::Pcm16 => {
                let wide = pcm_from_le_bytes(delta);
                encode_pcm_attenuated(&downsample_24k_to_8k(&wide))
            }
            Self::G711Ulaw => delta.to_vec(),
        }
    }

    /// Convert an inbound μ-law RTP payload into realtime audio bytes.
    pub fn from_telephony(self, payload: &[u8]) -> Vec<u8> {
        match self {
            Self::Pcm16 => pcm_to_le_bytes(&upsample_8k_to_24k(&decode_mulaw_buf(payload))),
            Self::G711Ulaw => payload.to_vec(),
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Accumulates caller audio between upstream flushes.
#[derive(Debug)]
pub struct UpstreamBatch {
    format: AudioFormat,
    pcm: Vec<i16>,
    ulaw: Vec<u8>,
}

impl UpstreamBatch {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            pcm: Vec::new(),
            ulaw: Vec::new(),
        }
    }

    pub fn push(&mut self, payload: &[u8]) {
        match self.format {
            AudioFormat::Pcm16 => self
                .pcm
                .extend(upsample_8k_to_24k(&decode_mulaw_buf(payload))),
            AudioFormat::G711Ulaw => self.ulaw.extend_from_slice(payload),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty() && self.ulaw.is_empty()
    }

    /// Drain the batch as realtime audio bytes. PCM batches are gain
    /// normalized first; the applied gain is returned alongside.
    pub fn take(&mut self) -> Option<(Vec<u8>, f64)> {
        if self.is_empty() {
            return None;
        }
        match self.format {
            AudioFormat::Pcm16 => {
                let mut samples = std::mem::take(&mut self.pcm);
                let gain = normalize_gain(&mut samples);
                Some((pcm_to_le_bytes(&samples), gain))
            }
            AudioFormat::G711Ulaw => Some((std::mem::take(&mut self.ulaw), 1.0)),
        }
    }
}

/// Little-endian PCM16 bytes to samples; a trailing odd byte is dropped.
pub fn pcm_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn pcm_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::mulaw::MULAW_SILENCE;

    #[test]
    fn wire_names_match_session_update() {
        assert_eq!(AudioFormat::Pcm16.wire_name(), "pcm16");
        assert_eq!(AudioFormat::G711Ulaw.wire_name(), "g711_ulaw");
        let parsed: AudioFormat = serde_json::from_str("\"g711_ulaw\"").unwrap();
        assert_eq!(parsed, AudioFormat::G711Ulaw);
    }

    #[test]
    fn three_seconds_inbound_becomes_wideband_pcm() {
        let payload = vec![0x55u8; 3 * TELEPHONY_SAMPLE_RATE as usize];
        let bytes = AudioFormat::Pcm16.from_telephony(&payload);
        let samples = pcm_from_le_bytes(&bytes);
        assert_eq!(samples.len(), 3 * WIDEBAND_SAMPLE_RATE as usize);
        assert_eq!(samples.len(), payload.len() * 3);
        assert_eq!(bytes.len(), payload.len() * 6);
    }

    #[test]
    fn one_frame_of_wideband_delta_becomes_one_rtp_frame() {
        let delta = pcm_to_le_bytes(&[0i16; 240]);
        let ulaw = AudioFormat::Pcm16.to_telephony(&delta);
        assert_eq!(ulaw, vec![MULAW_SILENCE; 80]);
    }

    #[test]
    fn passthrough_leaves_bytes_untouched() {
        let data = [1u8, 2, 3, 0x7F];
        assert_eq!(AudioFormat::G711Ulaw.to_telephony(&data), data.to_vec());
        assert_eq!(AudioFormat::G711Ulaw.from_telephony(&data), data.to_vec());
    }

    #[test]
    fn drain_rate_matches_format() {
        assert_eq!(AudioFormat::Pcm16.bytes_per_second(), 48_000);
        assert_eq!(AudioFormat::G711Ulaw.bytes_per_second(), 8_000);
    }

    #[test]
    fn batch_flushes_once() {
        let mut batch = UpstreamBatch::new(AudioFormat::Pcm16);
        assert!(batch.take().is_none());
        batch.push(&[0x55; 160]);
        batch.push(&[0x55; 160]);
        let (bytes, _gain) = batch.take().unwrap();
        assert_eq!(bytes.len(), 320 * 3 * 2);
        assert!(batch.take().is_none());
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        assert_eq!(pcm_from_le_bytes(&[1, 0, 9]), vec![1]);
    }
}
