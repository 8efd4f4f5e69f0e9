//! RTP framing for PCMU (payload type 0) at 10 ms per packet.

use std::time::Duration;

pub const RTP_VERSION: u8 = 2;
pub const RTP_HEADER_LEN: usize = 12;
pub const PAYLOAD_TYPE_PCMU: u8 = 0;
/// μ-law bytes per packet: 10 ms at 8 kHz.
pub const FRAME_BYTES: usize = 80;
pub const FRAME_DURATION: Duration = Duration::from_millis(10);

/// Sequencing state of one outbound stream.
#[derive(Debug, Clone)]
pub struct RtpStream {
    seq: u16,
    timestamp: u32,
    ssrc: u32,
    packets: u64,
}

impl RtpStream {
    /// Fresh stream with a random initial sequence number and SSRC.
    pub fn new() -> Self {
        Self::with_state(rand::random::<u16>(), 0, rand::random::<u32>())
    }

    pub fn with_state(seq: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            seq,
            timestamp,
            ssrc,
            packets: 0,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next packet will carry.
    pub fn next_seq(&self) -> u16 {
        self.seq
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Frame `payload` with the current counters, then advance them.
    pub fn next_packet(&mut self, payload: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(RTP_HEADER_LEN + payload.len());
        packet.push(RTP_VERSION << 6);
        packet.push(PAYLOAD_TYPE_PCMU & 0x7F);
        packet.extend_from_slice(&self.seq.to_be_bytes());
        packet.extend_from_slice(&self.timestamp.to_be_bytes());
        packet.extend_from_slice(&self.ssrc.to_be_bytes());
        packet.extend_from_slice(payload);

        self.seq = self.seq.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(FRAME_BYTES as u32);
        self.packets += 1;
        packet
    }
}

impl Default for RtpStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed header fields of a received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub seq: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

/// Split a datagram into header and payload.
///
/// CSRC lists and header extensions are skipped; trailing padding is
/// removed. Returns `None` for anything that is not RTP version 2.
pub fn parse_packet(datagram: &[u8]) -> Option<(RtpHeader, &[u8])> {
    if datagram.len() < RTP_HEADER_LEN || datagram[0] >> 6 != RTP_VERSION {
        return None;
    }
    let padding = datagram[0] & 0x20 != 0;
    let extension = datagram[0] & 0x10 != 0;
    let csrc_count = usize::from(datagram[0] & 0x0F);

    let header = RtpHeader {
        marker: datagram[1] & 0x80 != 0,
        payload_type: datagram[1] & 0x7F,
        seq: u16::from_be_bytes([datagram[2], datagram[3]]),
        timestamp: u32::from_be_bytes([datagram[4], datagram[5], datagram[6], datagram[7]]),
        ssrc: u32::from_be_bytes([datagram[8], datagram[9], datagram[10], datagram[11]]),
    };

    let mut offset = RTP_HEADER_LEN + csrc_count * 4;
    if extension {
        let words = datagram.get(offset + 2..offset + 4)?;
        offset += 4 + usize::from(u16::from_be_bytes([words[0], words[1]])) * 4;
    }
    let mut end = datagram.len();
    if padding {
        let pad = usize::from(*datagram.last()?);
        end = end.checked_sub(pad)?;
    }
    if offset > end {
        return None;
    }
    Some((header, &datagram[offset..end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_pcmu_v2() {
        let mut stream = RtpStream::with_state(0x1234, 0, 0xDEADBEEF);
        let packet = stream.next_packet(&[0x7F; FRAME_BYTES]);
        assert_eq!(packet.len(), RTP_HEADER_LEN + FRAME_BYTES);
        assert_eq!(packet[0], 0x80);
        assert_eq!(packet[1], 0x00);
        assert_eq!(&packet[2..4], &[0x12, 0x34]);
        assert_eq!(&packet[4..8], &[0, 0, 0, 0]);
        assert_eq!(&packet[8..12], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn sequence_and_timestamp_advance_per_frame() {
        let mut stream = RtpStream::with_state(65_534, u32::MAX - 100, 7);
        let mut last: Option<RtpHeader> = None;
        for _ in 0..5 {
            let packet = stream.next_packet(&[0u8; FRAME_BYTES]);
            let (header, payload) = parse_packet(&packet).unwrap();
            assert_eq!(payload.len(), FRAME_BYTES);
            if let Some(prev) = last {
                assert_eq!(header.seq, prev.seq.wrapping_add(1));
                assert_eq!(header.timestamp, prev.timestamp.wrapping_add(80));
                assert_eq!(header.ssrc, prev.ssrc);
            }
            last = Some(header);
        }
        assert_eq!(stream.packets(), 5);
        assert_eq!(stream.next_seq(), 3);
    }

    #[test]
    fn parse_skips_csrc_and_extension() {
        let mut packet = vec![0x80 | 0x10 | 0x01, 0x00, 0, 1, 0, 0, 0, 80, 0, 0, 0, 9];
        packet.extend_from_slice(&[1, 2, 3, 4]); // csrc
        packet.extend_from_slice(&[0xBE, 0xDE, 0, 1, 9, 9, 9, 9]); // one-word extension
        packet.extend_from_slice(&[0x55; 4]);
        let (header, payload) = parse_packet(&packet).unwrap();
        assert_eq!(header.seq, 1);
        assert_eq!(header.ssrc, 9);
        assert_eq!(payload, &[0x55; 4]);
    }

    #[test]
    fn parse_rejects_short_and_foreign_datagrams() {
        assert!(parse_packet(&[0x80; 4]).is_none());
        assert!(parse_packet(&[0x40; 20]).is_none());
    }

    #[test]
    fn parse_strips_padding() {
        let mut packet = vec![0x80 | 0x20, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        packet.extend_from_slice(&[0x11, 0x22, 0, 0, 3]);
        let (_, payload) = parse_packet(&packet).unwrap();
        assert_eq!(payload, &[0x11, 0x22]);
    }
}
