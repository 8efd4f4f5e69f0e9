//! Audio codec engine: μ-law companding, rate conversion, gain, and the
//! transcoding strategy for the negotiated realtime format.
//!
//! Everything here is stateless except [`UpstreamBatch`] and
//! [`CallRecording`], which are owned by a single call.

pub mod format;
pub mod gain;
pub mod mulaw;
pub mod resample;
pub mod wav;

pub use format::{AudioFormat, UpstreamBatch, TELEPHONY_SAMPLE_RATE, WIDEBAND_SAMPLE_RATE};
pub use mulaw::{decode_mulaw, encode_mulaw, is_silence, MULAW_SILENCE};
pub use wav::CallRecording;
