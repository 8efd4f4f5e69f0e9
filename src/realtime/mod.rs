//! Realtime speech-to-speech session: wire events, tool schemas and the
//! websocket link.
//!
//! ## Protocol overview
//!
//! 1. **Connect**: websocket to `wss://…/v1/realtime?model=…`
//! 2. **Setup**: `session.update` with voice, instructions, audio formats,
//!    server VAD, transcription and tool schemas
//! 3. **Greet**: a user text item plus `response.create`
//! 4. **Stream**: `input_audio_buffer.append` up, `response.audio.delta` down
//! 5. **Tools**: `response.done` carries function calls; results go back as
//!    `function_call_output` items followed by `response.create`

pub mod connection;
pub mod events;
pub mod messages;
pub mod tools;

pub use connection::{RealtimeConnector, RealtimeLink, WsConnector};
pub use events::{parse_server_event, FunctionCall, ServerEvent};
pub use messages::{ClientEvent, SessionSettings};
pub use tools::{tool_schemas, ToolKind};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("realtime connect failed: {0}")]
    Connect(String),
    #[error("realtime link closed")]
    Closed,
    #[error("malformed realtime event: {0}")]
    Malformed(String),
}
