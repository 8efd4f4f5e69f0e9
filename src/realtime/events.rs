//! Server → client events of the realtime protocol.

use base64::Engine;
use serde_json::Value;

use super::ProtocolError;

/// A tool invocation requested by the model in a finished response.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub call_id: String,
    pub name: String,
    /// Raw JSON arguments as sent by the model.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SessionCreated,
    SessionUpdated,
    ResponseCreated { response_id: Option<String> },
    ItemCreated { item_id: String, role: Option<String> },
    SpeechStarted,
    SpeechStopped,
    AudioDelta { response_id: Option<String>, data: Vec<u8> },
    AudioDone,
    OutputTranscriptDelta { delta: String },
    OutputTranscriptDone { transcript: String },
    InputTranscriptDelta { item_id: String, delta: String },
    InputTranscriptCompleted { item_id: String, transcript: String },
    ResponseDone { status: Option<String>, function_calls: Vec<FunctionCall> },
    Error { message: String, code: Option<String> },
    /// Anything not acted on; kept for logging.
    Other { kind: String },
}

impl ServerEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::SessionCreated => "session.created",
            Self::SessionUpdated => "session.updated",
            Self::ResponseCreated { .. } => "response.created",
            Self::ItemCreated { .. } => "conversation.item.created",
            Self::SpeechStarted => "input_audio_buffer.speech_started",
            Self::SpeechStopped => "input_audio_buffer.speech_stopped",
            Self::AudioDelta { .. } => "response.audio.delta",
            Self::AudioDone => "response.audio.done",
            Self::OutputTranscriptDelta { .. } => "response.audio_transcript.delta",
            Self::OutputTranscriptDone { .. } => "response.audio_transcript.done",
            Self::InputTranscriptDelta { .. } => {
                "conversation.item.input_audio_transcription.delta"
            }
            Self::InputTranscriptCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            Self::ResponseDone { .. } => "response.done",
            Self::Error { .. } => "error",
            Self::Other { kind } => kind,
        }
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Parse one text frame from the realtime socket.
pub fn parse_server_event(json_text: &str) -> Result<ServerEvent, ProtocolError> {
    let value: Value = serde_json::from_str(json_text)
        .map_err(|e| ProtocolError::Malformed(format!("invalid JSON: {e}")))?;
    let event_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("event without type".into()))?;

    let event = match event_type {
        "session.created" => ServerEvent::SessionCreated,
        "session.updated" => ServerEvent::SessionUpdated,
        "response.created" => ServerEvent::ResponseCreated {
            response_id: value.get("response").and_then(|r| str_field(r, "id")),
        },
        "conversation.item.created" => {
            let item = value.get("item").unwrap_or(&Value::Null);
            ServerEvent::ItemCreated {
                item_id: str_field(item, "id").unwrap_or_default(),
                role: str_field(item, "role"),
            }
        }
        "input_audio_buffer.speech_started" => ServerEvent::SpeechStarted,
        "input_audio_buffer.speech_stopped" => ServerEvent::SpeechStopped,
        "response.audio.delta" => {
            let b64 = value.get("delta").and_then(Value::as_str).unwrap_or("");
            let data = base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| ProtocolError::Malformed(format!("audio delta: {e}")))?;
            ServerEvent::AudioDelta {
                response_id: str_field(&value, "response_id"),
                data,
            }
        }
        "response.audio.done" => ServerEvent::AudioDone,
        "response.audio_transcript.delta" => ServerEvent::OutputTranscriptDelta {
            delta: str_field(&value, "delta").unwrap_or_default(),
        },
        "response.audio_transcript.done" => ServerEvent::OutputTranscriptDone {
            transcript: str_field(&value, "transcript").unwrap_or_default(),
        },
        "conversation.item.input_audio_transcription.delta" => {
            ServerEvent::InputTranscriptDelta {
                item_id: str_field(&value, "item_id").unwrap_or_default(),
                delta: str_field(&value, "delta").unwrap_or_default(),
            }
        }
        "conversation.item.input_audio_transcription.completed" => {
            ServerEvent::InputTranscriptCompleted {
                item_id: str_field(&value, "item_id").unwrap_or_default(),
                transcript: str_field(&value, "transcript").unwrap_or_default(),
            }
        }
        "response.done" => {
            let response = value.get("response").unwrap_or(&Value::Null);
            let function_calls = response
                .get("output")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter(|item| item.get("type").and_then(Value::as_str) == Some("function_call"))
                        .map(|item| FunctionCall {
                            call_id: str_field(item, "call_id").unwrap_or_default(),
                            name: str_field(item, "name").unwrap_or_default(),
                            arguments: str_field(item, "arguments").unwrap_or_else(|| "{}".into()),
                        })
                        .collect()
                })
                .unwrap_or_default();
            ServerEvent::ResponseDone {
                status: str_field(response, "status"),
                function_calls,
            }
        }
        "error" => {
            let error = value.get("error").unwrap_or(&Value::Null);
            ServerEvent::Error {
                message: str_field(error, "message").unwrap_or_else(|| "Unknown realtime error".into()),
                code: str_field(error, "code"),
            }
        }
        other => ServerEvent::Other {
            kind: other.to_string(),
        },
    };
    Ok(event)
}
