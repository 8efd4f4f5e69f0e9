//! Persistent realtime websocket link.
//!
//! [`WsConnector::connect`] opens the socket, sends `session.update`, and
//! spawns two tasks:
//!
//! 1. **Outbound**: serializes [`ClientEvent`]s onto the socket.
//! 2. **Inbound**: parses frames into [`ServerEvent`]s and queues them.
//!
//! The inbound queue is unbounded so a slow consumer never stalls the socket
//! read. When the socket closes the queue's sender is dropped, which the
//! consumer observes as a lost link.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::events::{parse_server_event, ServerEvent};
use super::messages::{ClientEvent, SessionSettings};
use super::ProtocolError;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// An open session: send with `outbound`, receive from `inbound`.
pub struct RealtimeLink {
    pub outbound: mpsc::Sender<ClientEvent>,
    pub inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

impl RealtimeLink {
    /// Queue an event for the socket. Fails once the link is gone.
    pub async fn send(&self, event: ClientEvent) -> Result<(), ProtocolError> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| ProtocolError::Closed)
    }
}

/// Opens realtime sessions. Faked in tests.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(
        &self,
        call_id: &str,
        settings: &SessionSettings,
    ) -> Result<RealtimeLink, ProtocolError>;
}

pub struct WsConnector {
    url: String,
    model: String,
    api_key: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl RealtimeConnector for WsConnector {
    async fn connect(
        &self,
        call_id: &str,
        settings: &SessionSettings,
    ) -> Result<RealtimeLink, ProtocolError> {
        let url = format!("{}?model={}", self.url, self.model);
        tracing::info!(
            call_id = %call_id,
            model = %self.model,
            format = %settings.audio_format,
            "Connecting to realtime session"
        );

        let mut request = url
            .into_client_request()
            .map_err(|e| ProtocolError::Connect(format!("bad request: {e}")))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.api_key)
                .parse()
                .map_err(|e| ProtocolError::Connect(format!("invalid auth header: {e}")))?,
        );
        request.headers_mut().insert(
            "OpenAI-Beta",
            "realtime=v1"
                .parse()
                .map_err(|e| ProtocolError::Connect(format!("invalid header: {e}")))?,
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ProtocolError::Connect(e.to_string()))?;
        let (mut ws_sender, ws_receiver) = ws_stream.split();

        let update = ClientEvent::session_update(settings).to_json().to_string();
        ws_sender
            .send(WsMessage::Text(update.into()))
            .await
            .map_err(|e| ProtocolError::Connect(format!("session.update failed: {e}")))?;
        tracing::debug!(call_id = %call_id, "Sent session.update");

        let (outbound_tx, outbound_rx) = mpsc::channel::<ClientEvent>(256);
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();

        tokio::spawn(outbound_loop(outbound_rx, ws_sender, call_id.to_string()));
        tokio::spawn(inbound_loop(ws_receiver, event_tx, call_id.to_string()));

        Ok(RealtimeLink {
            outbound: outbound_tx,
            inbound: event_rx,
        })
    }
}

async fn outbound_loop(
    mut rx: mpsc::Receiver<ClientEvent>,
    mut ws_sender: futures_util::stream::SplitSink<WsStream, WsMessage>,
    call_id: String,
) {
    let mut audio_chunks: u64 = 0;

    while let Some(event) = rx.recv().await {
        if let ClientEvent::AudioAppend(bytes) = &event {
            audio_chunks += 1;
            if audio_chunks == 1 || audio_chunks.is_multiple_of(50) {
                tracing::debug!(
                    call_id = %call_id,
                    chunk = audio_chunks,
                    bytes = bytes.len(),
                    "Sending caller audio upstream"
                );
            }
        } else {
            tracing::debug!(call_id = %call_id, kind = event.kind(), "Sending client event");
        }

        let json = event.to_json().to_string();
        if let Err(e) = ws_sender.send(WsMessage::Text(json.into())).await {
            tracing::warn!(call_id = %call_id, error = %e, "Realtime send failed, closing outbound loop");
            break;
        }
    }

    let _ = ws_sender.send(WsMessage::Close(None)).await;
    tracing::debug!(call_id = %call_id, "Realtime outbound loop terminated");
}

async fn inbound_loop(
    mut ws_receiver: futures_util::stream::SplitStream<WsStream>,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    call_id: String,
) {
    let mut audio_deltas: u64 = 0;

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => match parse_server_event(text.as_str()) {
                Ok(event) => {
                    if matches!(event, ServerEvent::AudioDelta { .. }) {
                        audio_deltas += 1;
                        if audio_deltas == 1 || audio_deltas.is_multiple_of(50) {
                            tracing::debug!(call_id = %call_id, n = audio_deltas, "⬇ Realtime audio delta");
                        }
                    }
                    if event_tx.send(event).is_err() {
                        tracing::debug!(call_id = %call_id, "Event consumer gone, closing inbound loop");
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(call_id = %call_id, error = %e, "Dropping malformed realtime event");
                }
            },
            Ok(WsMessage::Close(frame)) => {
                tracing::info!(call_id = %call_id, close_frame = ?frame, "Realtime connection closed");
                break;
            }
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) | WsMessage::Binary(_)) => {}
            Err(e) => {
                tracing::error!(call_id = %call_id, error = %e, "Realtime websocket error");
                break;
            }
        }
    }

    tracing::debug!(call_id = %call_id, "Realtime inbound loop terminated");
}
