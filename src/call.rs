//! One live call: the actor that ties the RTP leg, the realtime session and
//! the dialogue orchestrator together.
//!
//! Everything a call owns is touched only from its actor task. Other tasks
//! talk to it through its [`CallMessage`] mailbox:
//!
//! - the RTP receiver (via the registry) delivers caller audio and the
//!   peer binding,
//! - validator and record-sink tasks report their results,
//! - the bridge forwards hangups and shutdown.
//!
//! The actor loop multiplexes four sources:
//!
//! 1. **Mailbox**: the messages above.
//! 2. **Event tick**: drains up to `event_batch_size` realtime events.
//! 3. **Flush tick**: sends accumulated caller audio upstream.
//! 4. **Max duration**: forces one hangup, then teardown.
//!
//! Teardown runs exactly once, after the loop, and starts by removing the
//! call from the registry.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::codec::{is_silence, AudioFormat, CallRecording, UpstreamBatch};
use crate::config::Config;
use crate::realtime::{
    ClientEvent, FunctionCall, RealtimeConnector, RealtimeLink, ServerEvent, SessionSettings,
    ToolKind,
};
use crate::registry::{CallHandle, CallRegistry};
use crate::rtp::RtpSender;
use crate::session::{Orchestrator, SaveDecision, SlotName, ValidationStart};
use crate::stream::StreamHandler;
use crate::telephony::CallControl;
use crate::validators::{
    AddressQuery, AddressValidator, PhoneValidator, RecordSink, ValidationOutcome,
};

const MAILBOX_CAPACITY: usize = 512;

/// Added to the spoken-duration estimate before giving up on a drain.
const DRAIN_GRACE_MS: u64 = 500;

/// Error codes that leave the realtime session usable. A barge-in can cancel
/// a response the server has already finished.
const BENIGN_ERROR_CODES: &[&str] = &["response_cancel_not_active"];

#[derive(Debug)]
pub enum CallMessage {
    /// One μ-law RTP payload from the caller.
    InboundAudio(Vec<u8>),
    /// The address the external-media leg sends from.
    PeerBound(SocketAddr),
    ValidationFinished {
        slot: SlotName,
        call_id: String,
        outcome: ValidationOutcome,
    },
    SaveFinished {
        call_id: String,
        result: Result<String, String>,
    },
    End {
        reason: EndReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The caller hung up.
    RemoteHangup,
    /// The call ran past `limits.max_call_duration_secs`.
    MaxDuration,
    /// The record was saved and the goodbye has been spoken.
    Completed,
    /// The realtime session could not be kept open.
    RealtimeLost,
    /// The media leg never joined the bridge.
    SetupFailed,
    Shutdown,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RemoteHangup => "remote_hangup",
            Self::MaxDuration => "max_duration",
            Self::Completed => "completed",
            Self::RealtimeLost => "realtime_lost",
            Self::SetupFailed => "setup_failed",
            Self::Shutdown => "shutdown",
        }
    }

    /// Let queued speech play out before tearing down.
    fn drains(self) -> bool {
        matches!(self, Self::Completed | Self::RealtimeLost)
    }

    /// We end the call rather than the caller.
    fn is_local(self) -> bool {
        self != Self::RemoteHangup
    }
}

/// Process-wide collaborators shared by every call.
pub struct CallServices {
    pub config: Arc<Config>,
    pub control: Arc<dyn CallControl>,
    pub connector: Arc<dyn RealtimeConnector>,
    pub phone: Arc<dyn PhoneValidator>,
    pub address: Arc<dyn AddressValidator>,
    pub sink: Arc<dyn RecordSink>,
    pub sender: RtpSender,
    pub registry: CallRegistry,
}

/// Switch-side resources created for a call before it starts.
#[derive(Debug, Clone)]
pub struct CallSetup {
    pub channel_id: String,
    pub bridge_id: String,
    pub external_channel_id: Option<String>,
    pub caller_number: Option<String>,
}

/// Register a call and start its actor. Returns the call id.
pub fn spawn_call(services: Arc<CallServices>, setup: CallSetup) -> Result<(String, JoinHandle<()>)> {
    let id = uuid::Uuid::new_v4().to_string();
    let orchestrator = Orchestrator::new(&id, &services.config.dialogue, setup.caller_number.clone())
        .context("Invalid dialogue phrase pattern")?;
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

    let registered = services.registry.insert(CallHandle {
        id: id.clone(),
        channel_id: setup.channel_id.clone(),
        bridge_id: setup.bridge_id.clone(),
        mailbox: tx.clone(),
        created_at: std::time::Instant::now(),
    });
    if !registered {
        anyhow::bail!("Channel {} already has a live call", setup.channel_id);
    }
    if let Some(ext) = &setup.external_channel_id {
        services.registry.link_external(ext, &id);
    }

    let format = services.config.realtime.audio_format;
    let recording = services.config.recording.enabled.then(CallRecording::default);
    let actor = CallActor {
        id: id.clone(),
        setup,
        services,
        mailbox_tx: tx,
        mailbox: rx,
        link: None,
        link_generation: 0,
        stream: None,
        peer: None,
        early_audio: Vec::new(),
        orchestrator,
        format,
        upstream: UpstreamBatch::new(format),
        recording,
        response_active: false,
        response_audio_started: false,
        response_bytes: 0,
        audio_deltas: 0,
        goodbye_pending: false,
        hung_up: false,
    };

    tracing::info!(call_id = %id, channel_id = %actor.setup.channel_id, "Call started");
    let handle = tokio::spawn(actor.run());
    Ok((id, handle))
}

struct CallActor {
    id: String,
    setup: CallSetup,
    services: Arc<CallServices>,
    mailbox_tx: mpsc::Sender<CallMessage>,
    mailbox: mpsc::Receiver<CallMessage>,
    link: Option<RealtimeLink>,
    /// Bumped on every (re)connect so a drained batch can tell its link is gone.
    link_generation: u64,
    stream: Option<StreamHandler>,
    peer: Option<SocketAddr>,
    /// Assistant audio that arrived before the RTP peer was known.
    early_audio: Vec<Vec<u8>>,
    orchestrator: Orchestrator,
    format: AudioFormat,
    upstream: UpstreamBatch,
    recording: Option<CallRecording>,
    response_active: bool,
    response_audio_started: bool,
    /// Delta bytes of the current response, for the drain estimate.
    response_bytes: usize,
    audio_deltas: u64,
    /// Saved; end the call once the next response finishes.
    goodbye_pending: bool,
    hung_up: bool,
}

impl CallActor {
    async fn run(mut self) {
        let reason = match self.connect(true).await {
            Ok(()) => self.event_loop().await,
            Err(reason) => reason,
        };
        self.teardown(reason).await;
    }

    async fn event_loop(&mut self) -> EndReason {
        let config = Arc::clone(&self.services.config);
        let mut event_tick =
            tokio::time::interval(Duration::from_millis(config.realtime.event_tick_ms.max(1)));
        event_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut flush_tick =
            tokio::time::interval(Duration::from_millis(config.rtp.inbound_flush_ms.max(1)));
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let max_duration = config.limits.max_call_duration();
        let deadline = tokio::time::sleep_until(
            Instant::now() + max_duration.unwrap_or(Duration::from_secs(86_400 * 365)),
        );
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                msg = self.mailbox.recv() => {
                    let Some(msg) = msg else { return EndReason::Shutdown };
                    if let Some(reason) = self.handle_message(msg).await {
                        return reason;
                    }
                }
                _ = event_tick.tick() => {
                    if let Some(reason) = self.drain_events().await {
                        return reason;
                    }
                }
                _ = flush_tick.tick() => {
                    if let Some(reason) = self.flush_upstream().await {
                        return reason;
                    }
                }
                () = &mut deadline, if max_duration.is_some() => {
                    tracing::warn!(
                        call_id = %self.id,
                        limit_secs = config.limits.max_call_duration_secs,
                        "Max call duration reached, hanging up"
                    );
                    self.hangup_once().await;
                    return EndReason::MaxDuration;
                }
            }
        }
    }

    // ── Realtime session ──────────────────────────────────────────

    async fn connect(&mut self, first: bool) -> Result<(), EndReason> {
        let config = Arc::clone(&self.services.config);
        let settings = SessionSettings::from_config(&config.realtime, Utc::now());
        let connector = Arc::clone(&self.services.connector);
        let id = self.id.clone();

        let link = config
            .realtime
            .reconnect_policy()
            .run("realtime_connect", |_| connector.connect(&id, &settings))
            .await
            .map_err(|e| {
                tracing::error!(call_id = %self.id, error = %e, "Realtime session unavailable");
                EndReason::RealtimeLost
            })?;
        self.link = Some(link);
        self.link_generation += 1;
        self.response_active = false;
        tracing::info!(call_id = %self.id, reconnect = !first, "Realtime session open");

        if first {
            let greeting = vec![
                ClientEvent::UserText(config.realtime.initial_message.clone()),
                ClientEvent::respond(),
            ];
            if let Some(link) = &self.link {
                for event in greeting {
                    link.send(event).await.map_err(|_| EndReason::RealtimeLost)?;
                }
            }
        }
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), EndReason> {
        tracing::warn!(call_id = %self.id, "Realtime link lost, reconnecting");
        self.link = None;
        self.connect(false).await
    }

    /// Send events in order. A failed send triggers one bounded reconnect,
    /// after which the failed event and everything behind it go out on the
    /// new link.
    async fn send_events(&mut self, events: Vec<ClientEvent>) -> Option<EndReason> {
        let mut pending = VecDeque::from(events);
        let mut reconnected = false;

        while let Some(event) = pending.pop_front() {
            let kind = event.kind();
            let unsent = match &self.link {
                Some(link) => link.outbound.send(event).await.err().map(|e| e.0),
                None => Some(event),
            };
            let Some(event) = unsent else {
                continue;
            };

            tracing::warn!(
                call_id = %self.id,
                kind,
                unsent = pending.len() + 1,
                "Could not send realtime event"
            );
            if reconnected {
                return Some(EndReason::RealtimeLost);
            }
            if let Err(reason) = self.reconnect().await {
                return Some(reason);
            }
            reconnected = true;
            pending.push_front(event);
        }
        None
    }

    async fn drain_events(&mut self) -> Option<EndReason> {
        let batch_size = self.services.config.realtime.event_batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);
        let mut lost = false;
        let generation = self.link_generation;

        match self.link.as_mut() {
            Some(link) => {
                while batch.len() < batch_size {
                    match link.inbound.try_recv() {
                        Ok(event) => batch.push(event),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            lost = true;
                            break;
                        }
                    }
                }
            }
            None => lost = true,
        }

        for event in batch {
            if let Some(reason) = self.handle_event(event).await {
                return Some(reason);
            }
            if self.link_generation != generation {
                // Reconnected mid-batch; the rest belongs to the old session.
                return None;
            }
        }
        if lost {
            return self.reconnect().await.err();
        }
        None
    }

    async fn handle_event(&mut self, event: ServerEvent) -> Option<EndReason> {
        match event {
            ServerEvent::SpeechStarted => self.barge_in("speech_started").await,
            ServerEvent::ItemCreated { role: Some(role), .. } if role == "user" => {
                self.barge_in("user_item").await
            }
            ServerEvent::ResponseCreated { response_id } => {
                tracing::debug!(call_id = %self.id, response_id = ?response_id, "Response started");
                self.response_active = true;
                self.response_audio_started = false;
                self.response_bytes = 0;
                None
            }
            ServerEvent::AudioDelta { data, .. } => {
                self.on_audio_delta(data);
                None
            }
            ServerEvent::AudioDone => {
                if let Some(stream) = &self.stream {
                    stream.flush_remainder();
                }
                None
            }
            ServerEvent::InputTranscriptCompleted { transcript, .. } => {
                tracing::info!(call_id = %self.id, text = %transcript, "Caller said");
                let correction = self.orchestrator.on_caller_transcript(&transcript)?;
                self.cut_playback();
                self.response_active = false;
                self.send_events(correction.events).await
            }
            ServerEvent::OutputTranscriptDone { transcript } => {
                tracing::info!(call_id = %self.id, text = %transcript, "Assistant said");
                let events = self.orchestrator.on_assistant_transcript(&transcript)?;
                self.cut_playback();
                self.response_active = false;
                self.send_events(events).await
            }
            ServerEvent::ResponseDone {
                status,
                function_calls,
            } => self.on_response_done(status, function_calls).await,
            ServerEvent::Error { message, code } => {
                if code.as_deref().is_some_and(|c| BENIGN_ERROR_CODES.contains(&c)) {
                    tracing::debug!(call_id = %self.id, code = ?code, error = %message, "Realtime warning");
                    return None;
                }
                tracing::error!(call_id = %self.id, code = ?code, error = %message, "Realtime session error");
                self.link = None;
                self.reconnect().await.err()
            }
            ServerEvent::SessionUpdated => {
                tracing::debug!(call_id = %self.id, "Session configured");
                None
            }
            other => {
                tracing::trace!(call_id = %self.id, kind = other.kind(), "Ignoring realtime event");
                None
            }
        }
    }

    // ── Outbound audio ────────────────────────────────────────────

    fn on_audio_delta(&mut self, data: Vec<u8>) {
        // Only μ-law deltas can be judged silent without decoding.
        if data.is_empty() || (self.format == AudioFormat::G711Ulaw && is_silence(&data)) {
            return;
        }

        self.audio_deltas += 1;
        if self.audio_deltas == 1 || self.audio_deltas.is_multiple_of(50) {
            tracing::debug!(
                call_id = %self.id,
                n = self.audio_deltas,
                bytes = data.len(),
                "Assistant audio delta"
            );
        }

        let padding = self.services.config.rtp.silence_padding_ms;
        let first = !self.response_audio_started;
        self.response_audio_started = true;
        self.response_bytes += data.len();

        match &self.stream {
            Some(stream) => {
                if first {
                    stream.pad_silence(padding);
                }
                stream.append(&data);
            }
            None => {
                self.early_audio.push(data);
                let cap = self.services.config.rtp.max_buffer_bytes;
                while self.early_audio.iter().map(Vec::len).sum::<usize>() > cap
                    && self.early_audio.len() > 1
                {
                    self.early_audio.remove(0);
                }
            }
        }
    }

    fn start_stream(&mut self, peer: SocketAddr) {
        if let Some(old) = self.stream.take() {
            old.stop();
        }
        let rtp = &self.services.config.rtp;
        let stream = StreamHandler::start(
            &self.id,
            peer,
            self.services.sender.clone(),
            self.format,
            rtp.stream_settings(),
        );
        if !self.early_audio.is_empty() {
            stream.pad_silence(rtp.silence_padding_ms);
            for delta in self.early_audio.drain(..) {
                stream.append(&delta);
            }
            stream.flush_remainder();
        }
        self.stream = Some(stream);
    }

    /// Drop whatever the assistant was saying and start a fresh stream.
    fn cut_playback(&mut self) {
        self.early_audio.clear();
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
        if let Some(peer) = self.peer {
            self.start_stream(peer);
        }
    }

    async fn barge_in(&mut self, trigger: &str) -> Option<EndReason> {
        let buffered = self.stream.as_ref().map_or(0, StreamHandler::buffered_bytes);
        if !self.response_active && buffered == 0 && self.early_audio.is_empty() {
            return None;
        }
        tracing::info!(
            call_id = %self.id,
            trigger,
            buffered,
            response_active = self.response_active,
            "Caller barge-in"
        );
        self.cut_playback();
        if self.response_active {
            self.response_active = false;
            return self.send_events(vec![ClientEvent::ResponseCancel]).await;
        }
        None
    }

    // ── Tools ─────────────────────────────────────────────────────

    async fn on_response_done(
        &mut self,
        status: Option<String>,
        function_calls: Vec<FunctionCall>,
    ) -> Option<EndReason> {
        self.response_active = false;
        tracing::debug!(
            call_id = %self.id,
            status = ?status,
            tools = function_calls.len(),
            audio_bytes = self.response_bytes,
            "Response done"
        );

        if self.goodbye_pending && function_calls.is_empty() {
            return Some(EndReason::Completed);
        }

        for call in function_calls {
            let events = self.dispatch_tool(call);
            if let Some(reason) = self.send_events(events).await {
                return Some(reason);
            }
        }

        if self.services.config.realtime.clear_input_after_response {
            return self.send_events(vec![ClientEvent::AudioClear]).await;
        }
        None
    }

    /// Start a tool call. Returns events to send right away; slow work is
    /// spawned and reports back through the mailbox.
    fn dispatch_tool(&mut self, call: FunctionCall) -> Vec<ClientEvent> {
        tracing::info!(
            call_id = %self.id,
            tool = %call.name,
            tool_call_id = %call.call_id,
            arguments = %call.arguments,
            "Tool call"
        );

        match ToolKind::from_name(&call.name) {
            Some(ToolKind::ValidatePhone) => {
                #[derive(Deserialize, Default)]
                struct PhoneArgs {
                    #[serde(default)]
                    phone: String,
                }
                let args: PhoneArgs = serde_json::from_str(&call.arguments).unwrap_or_default();
                match self.orchestrator.begin_validation(SlotName::Phone, &call.call_id) {
                    ValidationStart::Immediate(events) => events,
                    ValidationStart::Dispatch => {
                        let validator = Arc::clone(&self.services.phone);
                        self.spawn_validation(SlotName::Phone, call.call_id, async move {
                            validator.validate(&args.phone).await
                        });
                        Vec::new()
                    }
                }
            }
            Some(ToolKind::ValidateAddress) => {
                let query: AddressQuery = serde_json::from_str(&call.arguments).unwrap_or_default();
                match self.orchestrator.begin_validation(SlotName::Address, &call.call_id) {
                    ValidationStart::Immediate(events) => events,
                    ValidationStart::Dispatch => {
                        let validator = Arc::clone(&self.services.address);
                        self.spawn_validation(SlotName::Address, call.call_id, async move {
                            validator.validate(&query).await
                        });
                        Vec::new()
                    }
                }
            }
            Some(ToolKind::SaveClientInfo) => {
                match self.orchestrator.on_save_request(&call.call_id, &call.arguments) {
                    SaveDecision::Persist(record) => {
                        let sink = Arc::clone(&self.services.sink);
                        let mailbox = self.mailbox_tx.clone();
                        let call_id = self.id.clone();
                        let tool_call_id = call.call_id;
                        tokio::spawn(async move {
                            let result = sink.commit(&record).await.map_err(|e| {
                                tracing::error!(call_id = %call_id, error = %e, "Record sink failed");
                                e.to_string()
                            });
                            let _ = mailbox
                                .send(CallMessage::SaveFinished {
                                    call_id: tool_call_id,
                                    result,
                                })
                                .await;
                        });
                        Vec::new()
                    }
                    SaveDecision::Deferred(events) | SaveDecision::Rejected(events) => events,
                }
            }
            None => {
                tracing::warn!(call_id = %self.id, tool = %call.name, "Unknown tool requested");
                vec![
                    ClientEvent::FunctionOutput {
                        call_id: call.call_id,
                        output: json!({ "ok": false, "error": "unknown_tool" }),
                    },
                    ClientEvent::respond(),
                ]
            }
        }
    }

    fn spawn_validation<F>(&self, slot: SlotName, tool_call_id: String, validation: F)
    where
        F: std::future::Future<Output = ValidationOutcome> + Send + 'static,
    {
        let mailbox = self.mailbox_tx.clone();
        let limit = self.services.config.dialogue.validator_timeout();
        let call_id = self.id.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(limit, validation).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(
                        call_id = %call_id,
                        slot = slot.as_str(),
                        timeout_ms = limit.as_millis() as u64,
                        "Validator timed out"
                    );
                    ValidationOutcome::invalid("timeout")
                }
            };
            let _ = mailbox
                .send(CallMessage::ValidationFinished {
                    slot,
                    call_id: tool_call_id,
                    outcome,
                })
                .await;
        });
    }

    // ── Mailbox ───────────────────────────────────────────────────

    async fn handle_message(&mut self, msg: CallMessage) -> Option<EndReason> {
        match msg {
            CallMessage::InboundAudio(payload) => {
                if let Some(recording) = &mut self.recording {
                    recording.record_inbound(&payload);
                }
                self.upstream.push(&payload);
                None
            }
            CallMessage::PeerBound(peer) => {
                if self.peer == Some(peer) {
                    return None;
                }
                tracing::info!(call_id = %self.id, peer = %peer, "RTP peer bound");
                self.peer = Some(peer);
                self.start_stream(peer);
                None
            }
            CallMessage::ValidationFinished {
                slot,
                call_id,
                outcome,
            } => {
                let events = self.orchestrator.complete_validation(slot, &call_id, outcome);
                self.send_events(events).await
            }
            CallMessage::SaveFinished { call_id, result } => {
                self.goodbye_pending = result.is_ok();
                if let Ok(order_number) = &result {
                    tracing::info!(call_id = %self.id, order_number = %order_number, "Record saved");
                }
                let events = self.orchestrator.complete_save(&call_id, result);
                self.send_events(events).await
            }
            CallMessage::End { reason } => Some(reason),
        }
    }

    async fn flush_upstream(&mut self) -> Option<EndReason> {
        let (bytes, gain) = self.upstream.take()?;
        if let Some(recording) = &mut self.recording {
            recording.record_forwarded(self.format, &bytes);
        }
        tracing::trace!(call_id = %self.id, bytes = bytes.len(), gain, "Flushing caller audio");
        if self.link.is_none() {
            return None;
        }
        self.send_events(vec![ClientEvent::AudioAppend(bytes)]).await
    }

    // ── Teardown ──────────────────────────────────────────────────

    async fn hangup_once(&mut self) {
        if self.hung_up {
            return;
        }
        self.hung_up = true;
        if let Err(e) = self.services.control.hangup(&self.setup.channel_id).await {
            tracing::warn!(call_id = %self.id, error = %e, "Hangup failed");
        }
    }

    fn drain_budget(&self) -> Duration {
        let bps = u64::from(self.format.bytes_per_second()).max(1);
        let spoken_ms = self.response_bytes as u64 * 1000 / bps;
        let cap = self.services.config.limits.drain_max_wait_ms;
        Duration::from_millis((spoken_ms + DRAIN_GRACE_MS).min(cap))
    }

    async fn teardown(&mut self, reason: EndReason) {
        if self.services.registry.remove(&self.id).is_none() {
            tracing::warn!(call_id = %self.id, "Call was already gone from the registry");
        }
        tracing::info!(call_id = %self.id, reason = reason.as_str(), "Tearing down call");

        if reason.drains() {
            if let Some(stream) = &self.stream {
                stream.flush_remainder();
                let budget = self.drain_budget();
                let drained = stream.wait_drained(budget).await;
                tracing::debug!(
                    call_id = %self.id,
                    drained,
                    budget_ms = budget.as_millis() as u64,
                    "Playback drain"
                );
            }
        }
        if reason.is_local() {
            self.hangup_once().await;
        }

        let frames_sent = self.stream.as_ref().map_or(0, StreamHandler::frames_sent);
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
        self.link = None;

        let control = Arc::clone(&self.services.control);
        if let Err(e) = control.destroy_bridge(&self.setup.bridge_id).await {
            tracing::warn!(call_id = %self.id, bridge_id = %self.setup.bridge_id, error = %e, "Bridge destroy failed");
        }
        if let Some(ext) = &self.setup.external_channel_id {
            if let Err(e) = control.hangup(ext).await {
                tracing::debug!(call_id = %self.id, channel_id = %ext, error = %e, "External media hangup failed");
            }
        }

        if let Some(recording) = self.recording.take() {
            if !recording.is_empty() {
                let dir = &self.services.config.recording.dir;
                match recording.save(dir, &self.id).await {
                    Ok((raw, wav)) => tracing::info!(
                        call_id = %self.id,
                        raw = %raw.display(),
                        wav = %wav.display(),
                        "Call audio saved"
                    ),
                    Err(e) => tracing::warn!(call_id = %self.id, error = %e, "Saving call audio failed"),
                }
            }
        }

        tracing::info!(
            call_id = %self.id,
            reason = reason.as_str(),
            frames_sent,
            order_number = ?self.orchestrator.state().saved_order,
            "Call ended"
        );
    }
}
