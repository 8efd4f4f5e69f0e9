//! Shared inbound RTP socket, demultiplexed to calls by source address.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::packet::parse_packet;

/// Where received payloads go. Implemented by the call registry.
pub trait DatagramSink: Send + Sync {
    /// Deliver a μ-law payload from `from`. Returns false when no call
    /// claims the address.
    fn deliver(&self, from: SocketAddr, payload: &[u8]) -> bool;
}

pub struct RtpReceiver {
    socket: Arc<UdpSocket>,
    log_every: u64,
}

impl RtpReceiver {
    pub fn new(socket: Arc<UdpSocket>, log_every: u64) -> Self {
        Self {
            socket,
            log_every: log_every.max(1),
        }
    }

    /// Receive until `shutdown` fires. Socket errors are logged and the loop
    /// keeps going.
    pub async fn run(self, sink: Arc<dyn DatagramSink>, shutdown: CancellationToken) {
        let mut buf = vec![0u8; 2048];
        let mut received: u64 = 0;
        let mut unrouted: u64 = 0;

        if let Ok(addr) = self.socket.local_addr() {
            tracing::info!(addr = %addr, "RTP receiver listening");
        }

        loop {
            let (len, from) = tokio::select! {
                () = shutdown.cancelled() => break,
                res = self.socket.recv_from(&mut buf) => match res {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "RTP receive failed");
                        continue;
                    }
                },
            };

            let Some((header, payload)) = parse_packet(&buf[..len]) else {
                tracing::debug!(from = %from, len, "Dropping non-RTP datagram");
                continue;
            };

            received += 1;
            if received.is_multiple_of(self.log_every) {
                tracing::debug!(
                    from = %from,
                    received,
                    unrouted,
                    seq = header.seq,
                    "RTP receive stats"
                );
            }

            if !sink.deliver(from, payload) {
                unrouted += 1;
                if unrouted == 1 || unrouted.is_multiple_of(self.log_every) {
                    tracing::debug!(from = %from, unrouted, "No call bound to RTP source");
                }
            }
        }

        tracing::info!(received, "RTP receiver stopped");
    }
}
