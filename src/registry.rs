//! Live calls, keyed by id, caller channel and RTP source address.
//!
//! The registry is the only state shared between calls. It routes inbound
//! RTP to a call's mailbox and makes sure a call is removed exactly once.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::call::CallMessage;
use crate::rtp::DatagramSink;

/// What the rest of the process knows about a call.
#[derive(Debug, Clone)]
pub struct CallHandle {
    pub id: String,
    /// Caller's channel on the switch.
    pub channel_id: String,
    /// Mixing bridge the external-media leg joins.
    pub bridge_id: String,
    pub mailbox: mpsc::Sender<CallMessage>,
    pub created_at: Instant,
}

#[derive(Default)]
struct Inner {
    calls: HashMap<String, CallHandle>,
    by_channel: HashMap<String, String>,
    peers: HashMap<SocketAddr, String>,
    /// Calls whose external-media leg has not sent its first packet yet,
    /// oldest first.
    awaiting_peer: VecDeque<String>,
    /// External-media channel id → call id.
    external: HashMap<String, String>,
}

#[derive(Clone, Default)]
pub struct CallRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call. False if the id or channel is already live.
    pub fn insert(&self, handle: CallHandle) -> bool {
        let mut inner = self.inner.lock();
        if inner.calls.contains_key(&handle.id) || inner.by_channel.contains_key(&handle.channel_id) {
            return false;
        }
        inner
            .by_channel
            .insert(handle.channel_id.clone(), handle.id.clone());
        inner.calls.insert(handle.id.clone(), handle);
        true
    }

    pub fn get(&self, call_id: &str) -> Option<CallHandle> {
        self.inner.lock().calls.get(call_id).cloned()
    }

    pub fn find_by_channel(&self, channel_id: &str) -> Option<CallHandle> {
        let inner = self.inner.lock();
        inner
            .by_channel
            .get(channel_id)
            .and_then(|id| inner.calls.get(id))
            .cloned()
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.inner.lock().calls.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner.lock().calls.keys().cloned().collect()
    }

    /// Drop a call and every route to it. Only the first caller gets `Some`.
    pub fn remove(&self, call_id: &str) -> Option<CallHandle> {
        let mut inner = self.inner.lock();
        let handle = inner.calls.remove(call_id)?;
        inner.by_channel.remove(&handle.channel_id);
        inner.peers.retain(|_, id| id != call_id);
        inner.awaiting_peer.retain(|id| id != call_id);
        inner.external.retain(|_, id| id != call_id);
        Some(handle)
    }

    /// Bind the next unknown RTP source to `call_id`.
    pub fn await_peer(&self, call_id: &str) {
        let mut inner = self.inner.lock();
        if inner.calls.contains_key(call_id) && !inner.awaiting_peer.iter().any(|id| id == call_id) {
            inner.awaiting_peer.push_back(call_id.to_string());
        }
    }

    pub fn peer_of(&self, call_id: &str) -> Option<SocketAddr> {
        self.inner
            .lock()
            .peers
            .iter()
            .find(|(_, id)| id.as_str() == call_id)
            .map(|(addr, _)| *addr)
    }

    pub fn link_external(&self, external_channel_id: &str, call_id: &str) {
        self.inner
            .lock()
            .external
            .insert(external_channel_id.to_string(), call_id.to_string());
    }

    /// Call that owns an external-media channel, if still live.
    pub fn external_owner(&self, external_channel_id: &str) -> Option<String> {
        self.inner.lock().external.get(external_channel_id).cloned()
    }

    pub fn take_external(&self, external_channel_id: &str) -> Option<String> {
        self.inner.lock().external.remove(external_channel_id)
    }

    /// Hand one RTP payload to the call that owns `from`. False when no
    /// call claims the address.
    pub fn route_datagram(&self, from: SocketAddr, payload: &[u8]) -> bool {
        let Some((call_id, mailbox, bound)) = self.route(from) else {
            return false;
        };

        if bound {
            if let Err(e) = mailbox.try_send(CallMessage::PeerBound(from)) {
                // The call never learned its peer; bind again on the next packet.
                self.unbind(from, &call_id);
                tracing::warn!(
                    call_id = %call_id,
                    peer = %from,
                    full = matches!(e, TrySendError::Full(_)),
                    "Could not notify call of its RTP peer, dropping packet"
                );
                return true;
            }
            tracing::info!(call_id = %call_id, peer = %from, "Bound RTP source to call");
        }

        match mailbox.try_send(CallMessage::InboundAudio(payload.to_vec())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!(call_id = %call_id, "Call mailbox full, dropping RTP payload");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(call_id = %call_id, "Call mailbox closed");
            }
        }
        true
    }

    /// Undo a binding made by [`Self::route`] and put the call back at the
    /// head of the waiting queue.
    fn unbind(&self, from: SocketAddr, call_id: &str) {
        let mut inner = self.inner.lock();
        if inner.peers.get(&from).is_some_and(|id| id == call_id) {
            inner.peers.remove(&from);
        }
        if inner.calls.contains_key(call_id) && !inner.awaiting_peer.iter().any(|id| id == call_id) {
            inner.awaiting_peer.push_front(call_id.to_string());
        }
    }

    /// Resolve `from` to a call, binding it to the oldest waiting call when
    /// the address is new. Returns the mailbox and whether it was just bound.
    fn route(&self, from: SocketAddr) -> Option<(String, mpsc::Sender<CallMessage>, bool)> {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.peers.get(&from) {
            let handle = inner.calls.get(id)?;
            return Some((handle.id.clone(), handle.mailbox.clone(), false));
        }
        while let Some(id) = inner.awaiting_peer.pop_front() {
            let Some(handle) = inner.calls.get(&id) else {
                continue;
            };
            let mailbox = handle.mailbox.clone();
            inner.peers.insert(from, id.clone());
            return Some((id, mailbox, true));
        }
        None
    }
}

impl DatagramSink for CallRegistry {
    fn deliver(&self, from: SocketAddr, payload: &[u8]) -> bool {
        self.route_datagram(from, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str, channel: &str) -> (CallHandle, mpsc::Receiver<CallMessage>) {
        let (tx, rx) = mpsc::channel(16);
        (
            CallHandle {
                id: id.into(),
                channel_id: channel.into(),
                bridge_id: format!("bridge-{id}"),
                mailbox: tx,
                created_at: Instant::now(),
            },
            rx,
        )
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn unknown_source_without_waiting_call_is_unrouted() {
        let registry = CallRegistry::new();
        let (h, _rx) = handle("a", "chan-a");
        registry.insert(h);
        assert!(!registry.deliver(addr(4000), &[0xFF; 160]));
    }

    #[tokio::test]
    async fn first_packet_binds_oldest_waiting_call() {
        let registry = CallRegistry::new();
        let (a, mut rx_a) = handle("a", "chan-a");
        let (b, mut rx_b) = handle("b", "chan-b");
        registry.insert(a);
        registry.insert(b);
        registry.await_peer("a");
        registry.await_peer("b");

        assert!(registry.deliver(addr(4000), &[1; 160]));
        assert!(matches!(rx_a.recv().await, Some(CallMessage::PeerBound(p)) if p == addr(4000)));
        assert!(matches!(rx_a.recv().await, Some(CallMessage::InboundAudio(ref d)) if d.len() == 160));

        assert!(registry.deliver(addr(4002), &[2; 160]));
        assert!(matches!(rx_b.recv().await, Some(CallMessage::PeerBound(p)) if p == addr(4002)));

        // Subsequent packets route without rebinding.
        assert!(registry.deliver(addr(4000), &[3; 160]));
        assert!(matches!(rx_a.recv().await, Some(CallMessage::InboundAudio(ref d)) if d[0] == 3));
        assert_eq!(registry.peer_of("a"), Some(addr(4000)));
    }

    #[test]
    fn remove_happens_once_and_clears_routes() {
        let registry = CallRegistry::new();
        let (a, _rx) = handle("a", "chan-a");
        registry.insert(a);
        registry.await_peer("a");
        registry.link_external("ext-1", "a");
        assert!(registry.deliver(addr(5000), &[0; 80]));

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.is_empty());
        assert!(registry.find_by_channel("chan-a").is_none());
        assert!(registry.external_owner("ext-1").is_none());
        assert!(!registry.deliver(addr(5000), &[0; 80]));
    }

    #[test]
    fn duplicate_channel_is_rejected() {
        let registry = CallRegistry::new();
        let (a, _rx_a) = handle("a", "chan");
        let (b, _rx_b) = handle("b", "chan");
        assert!(registry.insert(a));
        assert!(!registry.insert(b));
        assert_eq!(registry.find_by_channel("chan").unwrap().id, "a");
    }

    #[test]
    fn full_mailbox_leaves_the_peer_unbound_until_notified() {
        let registry = CallRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        registry.insert(CallHandle {
            id: "a".into(),
            channel_id: "chan-a".into(),
            bridge_id: "bridge-a".into(),
            mailbox: tx.clone(),
            created_at: Instant::now(),
        });
        registry.await_peer("a");
        tx.try_send(CallMessage::InboundAudio(vec![0; 80])).unwrap();

        assert!(registry.deliver(addr(7000), &[1; 80]));
        assert_eq!(registry.peer_of("a"), None);

        assert!(matches!(rx.try_recv(), Ok(CallMessage::InboundAudio(_))));
        assert!(registry.deliver(addr(7000), &[2; 80]));
        assert!(matches!(rx.try_recv(), Ok(CallMessage::PeerBound(p)) if p == addr(7000)));
        assert_eq!(registry.peer_of("a"), Some(addr(7000)));
    }

    #[test]
    fn stale_waiting_entries_are_skipped() {
        let registry = CallRegistry::new();
        let (a, _rx_a) = handle("a", "chan-a");
        let (b, mut rx_b) = handle("b", "chan-b");
        registry.insert(a);
        registry.insert(b);
        registry.await_peer("a");
        registry.await_peer("b");
        registry.remove("a");

        assert!(registry.deliver(addr(6000), &[0; 80]));
        assert!(matches!(rx_b.try_recv(), Ok(CallMessage::PeerBound(_))));
    }
}
