//! Per-call outbound audio stream.
//!
//! Realtime audio deltas arrive in irregular bursts; the RTP leg wants one
//! 80-byte μ-law frame every 10 ms. [`StreamHandler`] converts each delta to
//! μ-law, queues it, and a pacing task drains whole frames on a drift-free
//! schedule.
//!
//! ## States
//!
//! ```text
//! Initializing ─▸ Streaming ◂─▸ Draining
//!       │             │             │
//!       └─────────────┴──── stop ───┴─▸ Stopped
//! ```
//!
//! - **Initializing**: a short burst of silence frames warms the media path.
//! - **Streaming**: whole frames are being sent at cadence.
//! - **Draining**: less than a frame is buffered; waiting for more audio.
//! - **Stopped**: terminal; the buffer is discarded and the task exits.
//!
//! A handler is never restarted. Barge-in stops it and the call builds a new
//! one, which brings a fresh SSRC, sequence space and pacing baseline.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::codec::{AudioFormat, MULAW_SILENCE, TELEPHONY_SAMPLE_RATE};
use crate::rtp::{Pacer, RtpSender, RtpStream, FRAME_BYTES, FRAME_DURATION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Initializing,
    Streaming,
    Draining,
    Stopped,
}

/// Tunables for one stream.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Silence frames sent before any audio.
    pub warmup_frames: usize,
    /// Buffered μ-law bytes kept before the oldest are dropped.
    pub max_buffer_bytes: usize,
    /// Log a progress line every this many packets.
    pub log_every_packets: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            warmup_frames: 10,
            max_buffer_bytes: 1024 * 1024,
            log_every_packets: 100,
        }
    }
}

struct Shared {
    buffer: Mutex<VecDeque<u8>>,
    wake: Notify,
    state: watch::Sender<StreamState>,
    stop: CancellationToken,
    frames_sent: AtomicU64,
    dropped_bytes: AtomicU64,
}

impl Shared {
    fn set_state(&self, next: StreamState) {
        self.state.send_if_modified(|current| {
            if *current == StreamState::Stopped || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn current(&self) -> StreamState {
        *self.state.borrow()
    }
}

/// Handle to a running outbound stream.
pub struct StreamHandler {
    call_id: String,
    format: AudioFormat,
    ssrc: u32,
    max_buffer_bytes: usize,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl StreamHandler {
    /// Spawn the pacing task and start warming the path toward `peer`.
    pub fn start(
        call_id: &str,
        peer: SocketAddr,
        sender: RtpSender,
        format: AudioFormat,
        settings: StreamSettings,
    ) -> Self {
        let rtp = RtpStream::new();
        let ssrc = rtp.ssrc();
        let (state, _) = watch::channel(StreamState::Initializing);
        let shared = Arc::new(Shared {
            buffer: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            state,
            stop: CancellationToken::new(),
            frames_sent: AtomicU64::new(0),
            dropped_bytes: AtomicU64::new(0),
        });

        tracing::info!(
            call_id = %call_id,
            peer = %peer,
            ssrc,
            format = %format,
            "Starting outbound stream"
        );

        let task = tokio::spawn(pacing_loop(
            call_id.to_string(),
            Arc::clone(&shared),
            rtp,
            peer,
            sender,
            settings.clone(),
        ));

        Self {
            call_id: call_id.to_string(),
            format,
            ssrc,
            max_buffer_bytes: settings.max_buffer_bytes.max(FRAME_BYTES),
            shared,
            task,
        }
    }

    /// Queue one realtime audio delta. Returns the μ-law bytes queued.
    pub fn append(&self, delta: &[u8]) -> usize {
        if self.is_stopped() || delta.is_empty() {
            return 0;
        }
        let ulaw = self.format.to_telephony(delta);
        self.push(&ulaw);
        ulaw.len()
    }

    /// Queue `ms` of silence ahead of whatever comes next.
    pub fn pad_silence(&self, ms: u32) {
        if self.is_stopped() || ms == 0 {
            return;
        }
        let bytes = (TELEPHONY_SAMPLE_RATE / 1000 * ms) as usize;
        self.push(&vec![MULAW_SILENCE; bytes]);
    }

    /// Pad a held partial frame out to a whole one so it gets sent.
    pub fn flush_remainder(&self) {
        let mut buf = self.shared.buffer.lock();
        let partial = buf.len() % FRAME_BYTES;
        if partial == 0 || self.is_stopped() {
            return;
        }
        buf.extend(std::iter::repeat_n(MULAW_SILENCE, FRAME_BYTES - partial));
        drop(buf);
        self.shared.wake.notify_one();
    }

    fn push(&self, ulaw: &[u8]) {
        let mut buf = self.shared.buffer.lock();
        buf.extend(ulaw.iter().copied());
        if buf.len() > self.max_buffer_bytes {
            let excess = buf.len() - self.max_buffer_bytes;
            buf.drain(..excess);
            let dropped = self.shared.dropped_bytes.fetch_add(excess as u64, Ordering::Relaxed)
                + excess as u64;
            tracing::warn!(
                call_id = %self.call_id,
                excess,
                dropped_total = dropped,
                "Outbound buffer full, dropping oldest audio"
            );
        }
        drop(buf);
        self.shared.wake.notify_one();
    }

    /// Retire the stream: discard buffered audio and end the pacing task.
    pub fn stop(&self) {
        if self.is_stopped() {
            return;
        }
        self.shared.state.send_replace(StreamState::Stopped);
        self.shared.stop.cancel();
        let discarded = {
            let mut buf = self.shared.buffer.lock();
            let n = buf.len();
            buf.clear();
            n
        };
        self.shared.wake.notify_one();
        tracing::info!(
            call_id = %self.call_id,
            ssrc = self.ssrc,
            discarded,
            frames_sent = self.frames_sent(),
            "Outbound stream stopped"
        );
    }

    pub fn state(&self) -> StreamState {
        self.shared.current()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == StreamState::Stopped
    }

    pub fn buffered_bytes(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    pub fn frames_sent(&self) -> u64 {
        self.shared.frames_sent.load(Ordering::Relaxed)
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.shared.dropped_bytes.load(Ordering::Relaxed)
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Wait until every whole frame has gone out, or `max_wait` elapses.
    /// Returns true if the stream drained (or stopped) in time.
    pub async fn wait_drained(&self, max_wait: Duration) -> bool {
        let mut rx = self.shared.state.subscribe();
        let shared = Arc::clone(&self.shared);
        let drained = async move {
            loop {
                let state = *rx.borrow_and_update();
                let buffered = shared.buffer.lock().len();
                match state {
                    StreamState::Stopped => return,
                    StreamState::Draining if buffered < FRAME_BYTES => return,
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };
        tokio::time::timeout(max_wait, drained).await.is_ok()
    }
}

impl Drop for StreamHandler {
    fn drop(&mut self) {
        self.shared.stop.cancel();
        self.shared.wake.notify_one();
        if !self.task.is_finished() {
            tracing::trace!(call_id = %self.call_id, ssrc = self.ssrc, "Stream handle dropped while pacing");
        }
    }
}

/// Sleep until the next frame slot unless the stream is stopped first.
async fn pace(pacer: &mut Pacer, stop: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = stop.cancelled() => false,
        () = pacer.wait() => true,
    }
}

/// Send one packet unless the stream is stopped first. A send cut short by
/// `stop` never reaches the socket.
async fn send_frame(sender: &RtpSender, packet: &[u8], peer: SocketAddr, stop: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = stop.cancelled() => false,
        _ = sender.send(packet, peer) => true,
    }
}

async fn pacing_loop(
    call_id: String,
    shared: Arc<Shared>,
    mut rtp: RtpStream,
    peer: SocketAddr,
    sender: RtpSender,
    settings: StreamSettings,
) {
    let log_every = settings.log_every_packets.max(1);
    let mut pacer = Pacer::new(FRAME_DURATION);

    let silence = [MULAW_SILENCE; FRAME_BYTES];
    for _ in 0..settings.warmup_frames {
        if !pace(&mut pacer, &shared.stop).await {
            return;
        }
        if !send_frame(&sender, &rtp.next_packet(&silence), peer, &shared.stop).await {
            return;
        }
        shared.frames_sent.fetch_add(1, Ordering::Relaxed);
    }
    shared.set_state(StreamState::Draining);

    loop {
        if shared.stop.is_cancelled() {
            break;
        }

        let frame: Option<Vec<u8>> = {
            let mut buf = shared.buffer.lock();
            (buf.len() >= FRAME_BYTES).then(|| buf.drain(..FRAME_BYTES).collect())
        };

        let Some(frame) = frame else {
            if shared.current() == StreamState::Streaming {
                tracing::debug!(
                    call_id = %call_id,
                    remainder = shared.buffer.lock().len(),
                    frames_sent = shared.frames_sent.load(Ordering::Relaxed),
                    "Outbound buffer drained"
                );
                shared.set_state(StreamState::Draining);
            }
            tokio::select! {
                () = shared.wake.notified() => {}
                () = shared.stop.cancelled() => break,
            }
            continue;
        };

        if shared.current() != StreamState::Streaming {
            // After an idle gap the old schedule is in the past; start a new block.
            if pacer.deadline() < Instant::now() {
                pacer.reset();
            }
            shared.set_state(StreamState::Streaming);
        }

        if !pace(&mut pacer, &shared.stop).await || shared.stop.is_cancelled() {
            break;
        }

        let seq = rtp.next_seq();
        if !send_frame(&sender, &rtp.next_packet(&frame), peer, &shared.stop).await {
            break;
        }
        let sent = shared.frames_sent.fetch_add(1, Ordering::Relaxed) + 1;
        if sent.is_multiple_of(log_every) {
            tracing::debug!(
                call_id = %call_id,
                seq,
                frames_sent = sent,
                buffered = shared.buffer.lock().len(),
                "RTP send progress"
            );
        }
    }

    shared.set_state(StreamState::Stopped);
    tracing::debug!(call_id = %call_id, ssrc = rtp.ssrc(), "Pacing loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::parse_packet;
    use tokio::net::UdpSocket;

    struct Harness {
        sender: RtpSender,
        sink: UdpSocket,
        peer: SocketAddr,
    }

    async fn harness() -> Harness {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = sink.local_addr().unwrap();
        Harness {
            sender: RtpSender::new(socket, 8),
            sink,
            peer,
        }
    }

    fn settings(warmup_frames: usize) -> StreamSettings {
        StreamSettings {
            warmup_frames,
            max_buffer_bytes: 4 * FRAME_BYTES,
            log_every_packets: 1000,
        }
    }

    /// Collect (ssrc, seq, payload_len) for everything that arrives within `window`.
    async fn collect(sink: &UdpSocket, window: Duration) -> Vec<(u32, u16, usize)> {
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        let deadline = Instant::now() + window;
        while let Ok(Ok((n, _))) = tokio::time::timeout_at(deadline, sink.recv_from(&mut buf)).await
        {
            if let Some((h, payload)) = parse_packet(&buf[..n]) {
                out.push((h.ssrc, h.seq, payload.len()));
            }
        }
        out
    }

    #[tokio::test]
    async fn warmup_burst_then_whole_frames() {
        let h = harness().await;
        let stream = StreamHandler::start("t", h.peer, h.sender.clone(), AudioFormat::G711Ulaw, settings(3));
        stream.append(&[0x11; FRAME_BYTES * 2 + 30]);

        let packets = collect(&h.sink, Duration::from_millis(200)).await;
        assert_eq!(packets.len(), 5);
        assert!(packets.iter().all(|p| p.2 == FRAME_BYTES));
        for pair in packets.windows(2) {
            assert_eq!(pair[1].1, pair[0].1.wrapping_add(1));
        }
        assert_eq!(stream.buffered_bytes(), 30);
        assert_eq!(stream.state(), StreamState::Draining);

        stream.flush_remainder();
        let tail = collect(&h.sink, Duration::from_millis(100)).await;
        assert_eq!(tail.len(), 1);
        assert_eq!(stream.buffered_bytes(), 0);
        stream.stop();
    }

    #[tokio::test]
    async fn overflow_drops_oldest_audio() {
        let h = harness().await;
        let stream = StreamHandler::start("t", h.peer, h.sender.clone(), AudioFormat::G711Ulaw, settings(50));
        stream.append(&[0x22; FRAME_BYTES * 6]);
        assert_eq!(stream.buffered_bytes(), FRAME_BYTES * 4);
        assert_eq!(stream.dropped_bytes(), (FRAME_BYTES * 2) as u64);
        stream.stop();
    }

    #[tokio::test]
    async fn silence_padding_is_eight_bytes_per_ms() {
        let h = harness().await;
        let mut s = settings(50);
        s.max_buffer_bytes = 10_000;
        let stream = StreamHandler::start("t", h.peer, h.sender.clone(), AudioFormat::G711Ulaw, s);
        stream.pad_silence(100);
        assert_eq!(stream.buffered_bytes(), 800);
        stream.stop();
    }

    #[tokio::test]
    async fn stop_is_terminal_and_clears_buffer() {
        let h = harness().await;
        let stream = StreamHandler::start("t", h.peer, h.sender.clone(), AudioFormat::G711Ulaw, settings(0));
        stream.append(&[0x33; FRAME_BYTES * 4]);
        stream.stop();
        assert_eq!(stream.state(), StreamState::Stopped);
        assert_eq!(stream.buffered_bytes(), 0);
        assert_eq!(stream.append(&[0x33; FRAME_BYTES]), 0);
        assert!(stream.wait_drained(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn barge_in_cutover_leaves_no_old_frames() {
        let h = harness().await;
        let old = StreamHandler::start("t", h.peer, h.sender.clone(), AudioFormat::G711Ulaw, settings(0));
        old.append(&[0x44; FRAME_BYTES * 4]);
        tokio::time::sleep(Duration::from_millis(15)).await;

        old.stop();
        assert_eq!(old.buffered_bytes(), 0);
        let fresh = StreamHandler::start("t", h.peer, h.sender.clone(), AudioFormat::G711Ulaw, settings(0));
        assert_ne!(fresh.ssrc(), old.ssrc());
        fresh.append(&[0x55; FRAME_BYTES * 3]);

        let packets = collect(&h.sink, Duration::from_millis(150)).await;
        let first_new = packets
            .iter()
            .position(|p| p.0 == fresh.ssrc())
            .expect("fresh stream sent nothing");
        assert!(packets[first_new..].iter().all(|p| p.0 == fresh.ssrc()));
        assert_eq!(packets.iter().filter(|p| p.0 == fresh.ssrc()).count(), 3);
        assert!(packets.iter().filter(|p| p.0 == old.ssrc()).count() < 4);
        fresh.stop();
    }

    #[tokio::test]
    async fn nothing_leaves_a_stopped_stream() {
        let h = harness().await;
        let mut s = settings(0);
        s.max_buffer_bytes = FRAME_BYTES * 20;
        let stream = StreamHandler::start("t", h.peer, h.sender.clone(), AudioFormat::G711Ulaw, s);
        stream.append(&[0x77; FRAME_BYTES * 20]);
        tokio::time::sleep(Duration::from_millis(25)).await;

        stream.stop();
        let at_stop = stream.frames_sent();
        assert!(at_stop < 20);

        let packets = collect(&h.sink, Duration::from_millis(100)).await;
        assert_eq!(packets.len() as u64, at_stop);
        assert_eq!(stream.frames_sent(), at_stop);
    }

    #[tokio::test]
    async fn wait_drained_returns_once_frames_are_out() {
        let h = harness().await;
        let stream = StreamHandler::start("t", h.peer, h.sender.clone(), AudioFormat::G711Ulaw, settings(0));
        stream.append(&[0x66; FRAME_BYTES * 3]);
        assert!(stream.wait_drained(Duration::from_millis(500)).await);
        assert_eq!(stream.frames_sent(), 3);
        stream.stop();
    }

    #[tokio::test]
    async fn pcm_deltas_are_transcoded() {
        let h = harness().await;
        let stream = StreamHandler::start("t", h.peer, h.sender.clone(), AudioFormat::Pcm16, settings(50));
        // 240 wideband samples = 10 ms = one frame.
        let queued = stream.append(&[0u8; 480]);
        assert_eq!(queued, FRAME_BYTES);
        stream.stop();
    }
}
