//! Process wiring: telephony events start and end call actors, the shared
//! RTP socket feeds the registry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::call::{spawn_call, CallMessage, CallServices, CallSetup, EndReason};
use crate::config::Config;
use crate::realtime::WsConnector;
use crate::registry::CallRegistry;
use crate::rtp::{RtpReceiver, RtpSender};
use crate::telephony::{events_url, run_event_stream, AriClient, TelephonyEvent};
use crate::validators::{CommandRecordSink, NominatimGeocoder, RuPhoneNormalizer};

/// Delay before reopening a dropped ARI event stream.
const EVENT_STREAM_RETRY: Duration = Duration::from_secs(2);

/// Extra time shutdown gives calls beyond their drain budget.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Bridge {
    services: Arc<CallServices>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Bridge {
    pub fn new(services: Arc<CallServices>) -> Self {
        Self {
            services,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn on_event(&self, event: TelephonyEvent) {
        match event {
            TelephonyEvent::CallStart { ref channel_id, .. } if event.is_external_media() => {
                if let Err(e) = self.attach_external(channel_id).await {
                    tracing::error!(channel_id = %channel_id, error = %e, "External media attach failed");
                }
            }
            TelephonyEvent::CallStart {
                channel_id,
                name,
                caller_number,
            } => {
                tracing::info!(
                    channel_id = %channel_id,
                    name = %name,
                    caller = caller_number.as_deref().unwrap_or("unknown"),
                    "Incoming call"
                );
                if let Err(e) = self.start_call(&channel_id, caller_number).await {
                    tracing::error!(channel_id = %channel_id, error = %e, "Call setup failed");
                }
            }
            TelephonyEvent::CallEnd { ref channel_id, .. } if event.is_external_media() => {
                self.services.registry.take_external(channel_id);
            }
            TelephonyEvent::CallEnd { channel_id, .. } => {
                let Some(handle) = self.services.registry.find_by_channel(&channel_id) else {
                    tracing::debug!(channel_id = %channel_id, "End for unknown channel");
                    return;
                };
                let _ = handle
                    .mailbox
                    .send(CallMessage::End {
                        reason: EndReason::RemoteHangup,
                    })
                    .await;
            }
        }
    }

    async fn start_call(&self, channel_id: &str, caller_number: Option<String>) -> Result<()> {
        let config = &self.services.config;
        let control = &self.services.control;

        let active = self.services.registry.len();
        if active >= config.limits.max_concurrent_calls {
            tracing::warn!(
                channel_id = %channel_id,
                active,
                limit = config.limits.max_concurrent_calls,
                "Concurrent call limit reached, rejecting call"
            );
            return control.hangup(channel_id).await;
        }

        let bridge_id = control.create_bridge().await.context("create bridge")?;
        let setup = async {
            config
                .telephony
                .attach_policy()
                .run("bridge_attach", |_| control.add_channel_to_bridge(&bridge_id, channel_id))
                .await
                .context("add caller to bridge")?;
            control.answer(channel_id).await.context("answer")?;
            control
                .create_external_media(&config.external_media_host())
                .await
                .context("create external media")
        };

        let external_channel_id = match setup.await {
            Ok(id) => id,
            Err(e) => {
                let _ = control.destroy_bridge(&bridge_id).await;
                let _ = control.hangup(channel_id).await;
                return Err(e);
            }
        };

        let (call_id, task) = spawn_call(
            Arc::clone(&self.services),
            CallSetup {
                channel_id: channel_id.to_string(),
                bridge_id,
                external_channel_id: Some(external_channel_id.clone()),
                caller_number,
            },
        )?;
        tracing::info!(
            call_id = %call_id,
            channel_id = %channel_id,
            external_channel_id = %external_channel_id,
            "Call bridged"
        );

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
        Ok(())
    }

    /// Put an external-media channel into its call's bridge and wait for
    /// its first RTP packet.
    async fn attach_external(&self, ext_channel_id: &str) -> Result<()> {
        let registry = &self.services.registry;
        let policy = self.services.config.telephony.attach_policy();

        // The channel's start event can race the call's registration.
        let handle = policy
            .run("external_media_owner", |_| async move {
                registry
                    .external_owner(ext_channel_id)
                    .and_then(|id| registry.get(&id))
                    .ok_or_else(|| anyhow::anyhow!("no call owns {ext_channel_id} yet"))
            })
            .await?;

        let attached = policy
            .run("bridge_attach", |_| {
                self.services
                    .control
                    .add_channel_to_bridge(&handle.bridge_id, ext_channel_id)
            })
            .await;

        if let Err(e) = attached {
            let _ = handle
                .mailbox
                .send(CallMessage::End {
                    reason: EndReason::SetupFailed,
                })
                .await;
            return Err(e);
        }

        registry.await_peer(&handle.id);
        tracing::info!(
            call_id = %handle.id,
            channel_id = %ext_channel_id,
            bridge_id = %handle.bridge_id,
            "External media joined bridge, waiting for RTP"
        );
        Ok(())
    }

    /// End every call through its normal teardown and wait for them.
    pub async fn shutdown(&self) {
        let ids = self.services.registry.ids();
        tracing::info!(calls = ids.len(), "Shutting down active calls");
        for id in ids {
            if let Some(handle) = self.services.registry.get(&id) {
                let _ = handle
                    .mailbox
                    .send(CallMessage::End {
                        reason: EndReason::Shutdown,
                    })
                    .await;
            }
        }

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        let limit = Duration::from_millis(self.services.config.limits.drain_max_wait_ms) + SHUTDOWN_GRACE;
        let all = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(limit, all).await.is_err() {
            tracing::warn!("Calls still running at shutdown deadline");
        }
    }
}

/// Build every collaborator from `config` and serve calls until Ctrl-C.
pub async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);

    let socket = Arc::new(
        UdpSocket::bind(&config.rtp.bind)
            .await
            .with_context(|| format!("Failed to bind RTP socket {}", config.rtp.bind))?,
    );
    let sender = RtpSender::new(Arc::clone(&socket), config.rtp.send_concurrency);
    let registry = CallRegistry::new();

    let control = Arc::new(AriClient::new(
        &config.telephony.ari_url,
        &config.telephony.ari_username,
        config.telephony.ari_password.clone(),
        &config.telephony.app,
    )?);
    let connector = Arc::new(WsConnector::new(
        config.realtime.url.clone(),
        config.realtime.model.clone(),
        config.realtime.api_key.clone().unwrap_or_default(),
    ));
    let geocoder = NominatimGeocoder::new(
        config.validation.geocoder_url.clone(),
        &config.validation.user_agent,
        Duration::from_secs(config.validation.geocoder_timeout_secs),
    )?;
    let sink = CommandRecordSink::new(
        &config.persistence.command,
        &config.persistence.order_number_pattern,
        Duration::from_secs(config.persistence.timeout_secs),
    )?;

    let services = Arc::new(CallServices {
        config: Arc::clone(&config),
        control,
        connector,
        phone: Arc::new(RuPhoneNormalizer),
        address: Arc::new(geocoder),
        sink: Arc::new(sink),
        sender,
        registry: registry.clone(),
    });
    let bridge = Bridge::new(services);
    let shutdown = CancellationToken::new();

    let receiver = RtpReceiver::new(Arc::clone(&socket), config.rtp.log_every_packets);
    let receiver_task = tokio::spawn(receiver.run(Arc::new(registry), shutdown.clone()));

    let url = events_url(
        &config.telephony.ari_url,
        &config.telephony.ari_username,
        config.telephony.ari_password.as_deref(),
        &config.telephony.app,
    )?;
    let (event_tx, mut event_rx) = mpsc::channel::<TelephonyEvent>(64);
    let events_shutdown = shutdown.clone();
    let events_task = tokio::spawn(async move {
        loop {
            match run_event_stream(&url, event_tx.clone(), events_shutdown.clone()).await {
                Ok(()) => break,
                Err(e) => tracing::warn!(error = %e, "ARI event stream lost, reconnecting"),
            }
            tokio::select! {
                () = events_shutdown.cancelled() => break,
                () = tokio::time::sleep(EVENT_STREAM_RETRY) => {}
            }
        }
    });

    tracing::info!(
        rtp = %config.rtp.bind,
        app = %config.telephony.app,
        format = %config.realtime.audio_format,
        max_calls = config.limits.max_concurrent_calls,
        "Bridge running"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received");
                break;
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let bridge = bridge.clone();
                tokio::spawn(async move { bridge.on_event(event).await });
            }
        }
    }

    shutdown.cancel();
    bridge.shutdown().await;
    let _ = events_task.await;
    let _ = receiver_task.await;
    tracing::info!("Bridge stopped");
    Ok(())
}
