//! In-process fakes for the call-control, realtime and collaborator seams.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::call::{CallMessage, CallServices, EndReason};
use crate::config::Config;
use crate::realtime::{ClientEvent, ProtocolError, RealtimeConnector, RealtimeLink, ServerEvent, SessionSettings};
use crate::registry::CallRegistry;
use crate::rtp::RtpSender;
use crate::session::ClientRecord;
use crate::telephony::CallControl;
use crate::validators::{AddressQuery, AddressValidator, RecordSink, RuPhoneNormalizer, ValidationOutcome};

#[derive(Default)]
pub struct FakeControl {
    pub answered: Mutex<Vec<String>>,
    pub bridges_created: Mutex<u32>,
    pub attached: Mutex<Vec<(String, String)>>,
    pub external_media: Mutex<Vec<String>>,
    pub hangups: Mutex<Vec<String>>,
    pub destroyed: Mutex<Vec<String>>,
    /// Emulates the switch reporting the end of a channel we hung up.
    pub registry: Mutex<Option<CallRegistry>>,
}

impl FakeControl {
    pub fn hangups_of(&self, channel_id: &str) -> usize {
        self.hangups.lock().iter().filter(|c| c.as_str() == channel_id).count()
    }
}

#[async_trait]
impl CallControl for FakeControl {
    async fn answer(&self, channel_id: &str) -> Result<()> {
        self.answered.lock().push(channel_id.to_string());
        Ok(())
    }

    async fn create_bridge(&self) -> Result<String> {
        let mut created = self.bridges_created.lock();
        *created += 1;
        Ok(format!("bridge-{}", *created))
    }

    async fn add_channel_to_bridge(&self, bridge_id: &str, channel_id: &str) -> Result<()> {
        self.attached
            .lock()
            .push((bridge_id.to_string(), channel_id.to_string()));
        Ok(())
    }

    async fn create_external_media(&self, external_host: &str) -> Result<String> {
        let mut created = self.external_media.lock();
        created.push(external_host.to_string());
        Ok(format!("ext-{}", created.len()))
    }

    async fn destroy_bridge(&self, bridge_id: &str) -> Result<()> {
        self.destroyed.lock().push(bridge_id.to_string());
        Ok(())
    }

    async fn hangup(&self, channel_id: &str) -> Result<()> {
        self.hangups.lock().push(channel_id.to_string());
        let registry = self.registry.lock().clone();
        if let Some(handle) = registry.and_then(|r| r.find_by_channel(channel_id)) {
            let _ = handle.mailbox.try_send(CallMessage::End {
                reason: EndReason::RemoteHangup,
            });
        }
        Ok(())
    }
}

pub type LinkEnds = (mpsc::Receiver<ClientEvent>, mpsc::UnboundedSender<ServerEvent>);

/// Hands out links and keeps the far end of the latest one for the test.
#[derive(Default)]
pub struct FakeConnector {
    ends: Mutex<Option<LinkEnds>>,
    /// Sessions opened so far, reconnects included.
    pub connects: Mutex<u32>,
}

impl FakeConnector {
    pub async fn far_end(&self) -> LinkEnds {
        for _ in 0..200 {
            if let Some(ends) = self.ends.lock().take() {
                return ends;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("call never connected");
    }
}

#[async_trait]
impl RealtimeConnector for FakeConnector {
    async fn connect(&self, _call_id: &str, _settings: &SessionSettings) -> Result<RealtimeLink, ProtocolError> {
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        *self.ends.lock() = Some((out_rx, in_tx));
        *self.connects.lock() += 1;
        Ok(RealtimeLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

pub struct AcceptAll;

#[async_trait]
impl AddressValidator for AcceptAll {
    async fn validate(&self, query: &AddressQuery) -> ValidationOutcome {
        ValidationOutcome::Valid {
            normalized: json!({ "display_name": query.free_text() }),
        }
    }
}

#[derive(Default)]
pub struct FixedSink {
    pub records: Mutex<Vec<ClientRecord>>,
}

#[async_trait]
impl RecordSink for FixedSink {
    async fn commit(&self, record: &ClientRecord) -> Result<String> {
        self.records.lock().push(record.clone());
        Ok("42".into())
    }
}

pub struct Harness {
    pub control: Arc<FakeControl>,
    pub connector: Arc<FakeConnector>,
    pub sink: Arc<FixedSink>,
    pub registry: CallRegistry,
    pub services: Arc<CallServices>,
}

/// Config with tool output ordering kept simple and no duration limit.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.realtime.clear_input_after_response = false;
    config.limits.max_call_duration_secs = 0;
    config.telephony.bridge_attach_delay_ms = 10;
    config
}

pub async fn harness(config: Config) -> Harness {
    let control = Arc::new(FakeControl::default());
    let connector = Arc::new(FakeConnector::default());
    let sink = Arc::new(FixedSink::default());
    let registry = CallRegistry::new();
    *control.registry.lock() = Some(registry.clone());
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let services = Arc::new(CallServices {
        config: Arc::new(config),
        control: control.clone(),
        connector: connector.clone(),
        phone: Arc::new(RuPhoneNormalizer),
        address: Arc::new(AcceptAll),
        sink: sink.clone(),
        sender: RtpSender::new(socket, 4),
        registry: registry.clone(),
    });
    Harness {
        control,
        connector,
        sink,
        registry,
        services,
    }
}

pub async fn next_event(rx: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("link closed")
}
