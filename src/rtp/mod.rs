//! RTP transport: framing, pacing, the shared send pool and the demuxing
//! receiver.

pub mod packet;
pub mod pacer;
pub mod receiver;
pub mod sender;

pub use packet::{parse_packet, RtpHeader, RtpStream, FRAME_BYTES, FRAME_DURATION, RTP_HEADER_LEN};
pub use pacer::Pacer;
pub use receiver::{DatagramSink, RtpReceiver};
pub use sender::RtpSender;
