//! Per-call audio artifacts: raw inbound μ-law and a PCM WAV of the audio
//! forwarded upstream.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::format::{pcm_to_le_bytes, AudioFormat, WIDEBAND_SAMPLE_RATE};
use super::mulaw::decode_mulaw_buf;
use super::resample::upsample_8k_to_24k;

pub const WAV_HEADER_LEN: usize = 44;

/// Canonical 44-byte RIFF/WAVE header for mono 16-bit PCM.
pub fn wav_header(data_len: u32, sample_rate: u32) -> [u8; WAV_HEADER_LEN] {
    const CHANNELS: u16 = 1;
    const BITS: u16 = 16;
    let block_align = CHANNELS * BITS / 8;
    let byte_rate = sample_rate * u32::from(block_align);

    let mut h = [0u8; WAV_HEADER_LEN];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&data_len.saturating_add(36).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes());
    h[20..22].copy_from_slice(&1u16.to_le_bytes());
    h[22..24].copy_from_slice(&CHANNELS.to_le_bytes());
    h[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    h[32..34].copy_from_slice(&block_align.to_le_bytes());
    h[34..36].copy_from_slice(&BITS.to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_len.to_le_bytes());
    h
}

/// Write `samples` as a 24 kHz mono WAV file.
pub async fn write_wav(path: &Path, samples: &[i16]) -> Result<()> {
    let data = pcm_to_le_bytes(samples);
    let data_len = u32::try_from(data.len()).context("WAV payload exceeds 4 GiB")?;
    let mut file = Vec::with_capacity(WAV_HEADER_LEN + data.len());
    file.extend_from_slice(&wav_header(data_len, WIDEBAND_SAMPLE_RATE));
    file.extend_from_slice(&data);
    tokio::fs::write(path, file)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Audio captured over the life of one call.
#[derive(Debug, Default)]
pub struct CallRecording {
    raw_inbound: Vec<u8>,
    forwarded: Vec<i16>,
}

impl CallRecording {
    pub fn record_inbound(&mut self, payload: &[u8]) {
        self.raw_inbound.extend_from_slice(payload);
    }

    /// Keep a copy of what was sent upstream, widened to 24 kHz PCM.
    pub fn record_forwarded(&mut self, format: AudioFormat, bytes: &[u8]) {
        match format {
            AudioFormat::Pcm16 => self
                .forwarded
                .extend(super::format::pcm_from_le_bytes(bytes)),
            AudioFormat::G711Ulaw => self
                .forwarded
                .extend(upsample_8k_to_24k(&decode_mulaw_buf(bytes))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.raw_inbound.is_empty() && self.forwarded.is_empty()
    }

    /// Write `<call_id>.ulaw` and `<call_id>.wav` under `dir`.
    pub async fn save(&self, dir: &Path, call_id: &str) -> Result<(PathBuf, PathBuf)> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let raw_path = dir.join(format!("{call_id}.ulaw"));
        let wav_path = dir.join(format!("{call_id}.wav"));
        tokio::fs::write(&raw_path, &self.raw_inbound)
            .await
            .with_context(|| format!("Failed to write {}", raw_path.display()))?;
        write_wav(&wav_path, &self.forwarded).await?;
        Ok((raw_path, wav_path))
    }
}
