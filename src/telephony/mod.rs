//! Telephony control plane: call lifecycle events in, bridge and channel
//! operations out.
//!
//! The call actor only sees [`CallControl`]; the Asterisk REST interface is
//! one implementation of it.

pub mod ari;

use anyhow::Result;
use async_trait::async_trait;

pub use ari::{events_url, parse_event, run_event_stream, AriClient};

/// Lifecycle events the bridge reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyEvent {
    CallStart {
        channel_id: String,
        name: String,
        caller_number: Option<String>,
    },
    CallEnd {
        channel_id: String,
        name: String,
    },
}

impl TelephonyEvent {
    pub fn channel_id(&self) -> &str {
        match self {
            Self::CallStart { channel_id, .. } | Self::CallEnd { channel_id, .. } => channel_id,
        }
    }

    /// External-media channels we created ourselves, as opposed to callers.
    pub fn is_external_media(&self) -> bool {
        let name = match self {
            Self::CallStart { name, .. } | Self::CallEnd { name, .. } => name,
        };
        name.starts_with("UnicastRTP")
    }
}

#[async_trait]
pub trait CallControl: Send + Sync {
    async fn answer(&self, channel_id: &str) -> Result<()>;

    /// Create a mixing bridge and return its id.
    async fn create_bridge(&self) -> Result<String>;

    async fn add_channel_to_bridge(&self, bridge_id: &str, channel_id: &str) -> Result<()>;

    /// Ask the switch to stream the call as μ-law RTP to `external_host`.
    /// Returns the new channel's id.
    async fn create_external_media(&self, external_host: &str) -> Result<String>;

    async fn destroy_bridge(&self, bridge_id: &str) -> Result<()>;

    async fn hangup(&self, channel_id: &str) -> Result<()>;
}
