//! Asterisk REST Interface client and event stream.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Method, Url};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use super::{CallControl, TelephonyEvent};

pub struct AriClient {
    base_url: String,
    username: String,
    password: Option<String>,
    app: String,
    http: reqwest::Client,
}

impl AriClient {
    pub fn new(
        base_url: &str,
        username: &str,
        password: Option<String>,
        app: &str,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password,
            app: app.to_string(),
            http,
        })
    }

    /// Issue one ARI request. Empty bodies come back as `Value::Null`.
    async fn request(&self, method: Method, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/ari{}", self.base_url, path);
        let resp = self
            .http
            .request(method.clone(), &url)
            .basic_auth(&self.username, self.password.as_deref())
            .query(query)
            .send()
            .await
            .with_context(|| format!("ARI {method} {path} failed"))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("ARI {method} {path} returned {status}: {body}");
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).with_context(|| format!("ARI {method} {path}: invalid JSON"))
    }

    fn id_of(value: &Value, what: &str) -> Result<String> {
        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("ARI {what} response has no id"))
    }
}

#[async_trait]
impl CallControl for AriClient {
    async fn answer(&self, channel_id: &str) -> Result<()> {
        self.request(Method::POST, &format!("/channels/{channel_id}/answer"), &[])
            .await?;
        Ok(())
    }

    async fn create_bridge(&self) -> Result<String> {
        let bridge = self
            .request(Method::POST, "/bridges", &[("type", "mixing,proxy_media")])
            .await?;
        Self::id_of(&bridge, "bridge")
    }

    async fn add_channel_to_bridge(&self, bridge_id: &str, channel_id: &str) -> Result<()> {
        self.request(
            Method::POST,
            &format!("/bridges/{bridge_id}/addChannel"),
            &[("channel", channel_id)],
        )
        .await?;
        Ok(())
    }

    async fn create_external_media(&self, external_host: &str) -> Result<String> {
        let channel = self
            .request(
                Method::POST,
                "/channels/externalMedia",
                &[
                    ("app", self.app.as_str()),
                    ("external_host", external_host),
                    ("format", "ulaw"),
                    ("transport", "udp"),
                    ("encapsulation", "rtp"),
                    ("connection_type", "client"),
                    ("direction", "both"),
                ],
            )
            .await?;
        Self::id_of(&channel, "externalMedia")
    }

    async fn destroy_bridge(&self, bridge_id: &str) -> Result<()> {
        self.request(Method::DELETE, &format!("/bridges/{bridge_id}"), &[])
            .await?;
        Ok(())
    }

    async fn hangup(&self, channel_id: &str) -> Result<()> {
        self.request(Method::DELETE, &format!("/channels/{channel_id}"), &[])
            .await?;
        Ok(())
    }
}

/// Websocket URL of the ARI event stream for `app`.
pub fn events_url(base_url: &str, username: &str, password: Option<&str>, app: &str) -> Result<Url> {
    let mut url = Url::parse(base_url).with_context(|| format!("Invalid ARI url {base_url}"))?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|()| anyhow::anyhow!("Cannot use {base_url} for websockets"))?;
    url.set_path("/ari/events");
    url.query_pairs_mut()
        .clear()
        .append_pair("app", app)
        .append_pair("api_key", &format!("{username}:{}", password.unwrap_or_default()));
    Ok(url)
}

/// Map one ARI event to a lifecycle event. Everything else is ignored.
pub fn parse_event(text: &str) -> Option<TelephonyEvent> {
    let value: Value = serde_json::from_str(text).ok()?;
    let channel = value.get("channel")?;
    let channel_id = channel.get("id")?.as_str()?.to_string();
    let name = channel
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match value.get("type")?.as_str()? {
        "StasisStart" => Some(TelephonyEvent::CallStart {
            channel_id,
            name,
            caller_number: channel
                .get("caller")
                .and_then(|c| c.get("number"))
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
        }),
        "StasisEnd" => Some(TelephonyEvent::CallEnd { channel_id, name }),
        _ => None,
    }
}

/// Forward lifecycle events until the socket closes or `shutdown` fires.
///
/// Returns `Ok` on shutdown and an error when the stream was lost, so the
/// caller can decide whether to reconnect.
pub async fn run_event_stream(
    url: &Url,
    events: mpsc::Sender<TelephonyEvent>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .context("ARI event stream connect failed")?;
    let (_sink, mut stream) = ws.split();
    tracing::info!(host = url.host_str().unwrap_or_default(), "ARI event stream connected");

    loop {
        let msg = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            msg = stream.next() => msg,
        };
        match msg {
            Some(Ok(WsMessage::Text(text))) => {
                let Some(event) = parse_event(text.as_str()) else {
                    continue;
                };
                tracing::debug!(event = ?event, "ARI event");
                if events.send(event).await.is_err() {
                    return Ok(());
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => anyhow::bail!("ARI event stream closed"),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e).context("ARI event stream error"),
        }
    }
}
