//! Client → server messages and the session configuration they carry.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::tools::tool_schemas;
use crate::codec::AudioFormat;
use crate::config::{RealtimeConfig, VadConfig};

/// Everything `session.update` needs. Rebuilt on every (re)connect.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub voice: String,
    pub instructions: String,
    pub audio_format: AudioFormat,
    pub transcription_model: String,
    pub transcription_language: String,
    pub vad: VadConfig,
    pub temperature: f32,
    pub tools: Vec<Value>,
}

impl SessionSettings {
    /// Settings for a session starting at `now`.
    pub fn from_config(config: &RealtimeConfig, now: DateTime<Utc>) -> Self {
        Self {
            voice: config.voice.clone(),
            instructions: dated_instructions(&config.instructions, &config.timezone, now),
            audio_format: config.audio_format,
            transcription_model: config.transcription_model.clone(),
            transcription_language: config.transcription_language.clone(),
            vad: config.vad.clone(),
            temperature: config.temperature,
            tools: tool_schemas(),
        }
    }
}

/// Prefix the system prompt with today's date in `timezone` so the model
/// can resolve "tomorrow" and similar phrases.
pub fn dated_instructions(prompt: &str, timezone: &str, now: DateTime<Utc>) -> String {
    match timezone.parse::<chrono_tz::Tz>() {
        Ok(tz) => {
            let local = now.with_timezone(&tz);
            format!(
                "Today is {} ({}), time zone {}.\n\n{}",
                local.format("%Y-%m-%d"),
                local.format("%A"),
                timezone,
                prompt
            )
        }
        Err(_) => format!("Today is {} (UTC).\n\n{}", now.format("%Y-%m-%d"), prompt),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Rendered `session` object.
    SessionUpdate(Value),
    /// User text item (the greeting trigger).
    UserText(String),
    /// Ask for a response, optionally with turn-specific instructions.
    ResponseCreate { instructions: Option<String> },
    AudioAppend(Vec<u8>),
    AudioClear,
    FunctionOutput { call_id: String, output: Value },
    ResponseCancel,
}

impl ClientEvent {
    pub fn session_update(settings: &SessionSettings) -> Self {
        Self::SessionUpdate(build_session_object(settings))
    }

    pub fn respond() -> Self {
        Self::ResponseCreate { instructions: None }
    }

    pub fn respond_with(instructions: impl Into<String>) -> Self {
        Self::ResponseCreate {
            instructions: Some(instructions.into()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionUpdate(_) => "session.update",
            Self::UserText(_) | Self::FunctionOutput { .. } => "conversation.item.create",
            Self::ResponseCreate { .. } => "response.create",
            Self::AudioAppend(_) => "input_audio_buffer.append",
            Self::AudioClear => "input_audio_buffer.clear",
            Self::ResponseCancel => "response.cancel",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::SessionUpdate(session) => json!({
                "type": "session.update",
                "session": session,
            }),
            Self::UserText(text) => json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "message",
                    "role": "user",
                    "content": [{ "type": "input_text", "text": text }]
                }
            }),
            Self::ResponseCreate { instructions: None } => json!({ "type": "response.create" }),
            Self::ResponseCreate {
                instructions: Some(instructions),
            } => json!({
                "type": "response.create",
                "response": { "instructions": instructions }
            }),
            Self::AudioAppend(bytes) => json!({
                "type": "input_audio_buffer.append",
                "audio": base64::engine::general_purpose::STANDARD.encode(bytes),
            }),
            Self::AudioClear => json!({ "type": "input_audio_buffer.clear" }),
            Self::FunctionOutput { call_id, output } => json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "function_call_output",
                    "call_id": call_id,
                    "output": output.to_string(),
                }
            }),
            Self::ResponseCancel => json!({ "type": "response.cancel" }),
        }
    }
}

fn build_session_object(settings: &SessionSettings) -> Value {
    json!({
        "modalities": ["audio", "text"],
        "voice": settings.voice,
        "instructions": settings.instructions,
        "input_audio_format": settings.audio_format.wire_name(),
        "output_audio_format": settings.audio_format.wire_name(),
        "input_audio_transcription": {
            "model": settings.transcription_model,
            "language": settings.transcription_language,
        },
        "turn_detection": {
            "type": "server_vad",
            "threshold": settings.vad.threshold,
            "prefix_padding_ms": settings.vad.prefix_padding_ms,
            "silence_duration_ms": settings.vad.silence_duration_ms,
        },
        "temperature": settings.temperature,
        "tools": settings.tools,
        "tool_choice": "auto",
    })
}
