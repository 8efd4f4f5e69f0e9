//! Outbound RTP send pool shared by every call.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;

/// Bounded-concurrency UDP sender.
///
/// At most `concurrency` sends are in flight at once across all calls; a call
/// waiting on a permit never holds up another call's already-admitted send.
#[derive(Clone)]
pub struct RtpSender {
    socket: Arc<UdpSocket>,
    permits: Arc<Semaphore>,
    sent: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl RtpSender {
    pub fn new(socket: Arc<UdpSocket>, concurrency: usize) -> Self {
        Self {
            socket,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            sent: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Send one datagram. Failures are logged and counted, never raised.
    pub async fn send(&self, packet: &[u8], peer: SocketAddr) -> bool {
        let Ok(_permit) = self.permits.acquire().await else {
            return false;
        };
        match self.socket.send_to(packet, peer).await {
            Ok(_) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                let failures = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(peer = %peer, failures, error = %e, "RTP send failed");
                false
            }
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
