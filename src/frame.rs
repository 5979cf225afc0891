use async_trait::async_trait;
use bytes::{Buf, Bytes};
#[cfg(test)] use mockall::automock;

use crate::error::RtspError;

/// One decoded unit of media data, extracted from a single datagram.
///
/// Frames are ephemeral: the receive task decodes them, hands them to the
///  [`FrameSink`] and the statistics engine, and drops them. The payload is a
///  zero-copy slice of the received datagram.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    pub payload_type: u8,
    pub marker: bool,
    /// wraps at 65536
    pub sequence_number: u16,
    /// presentation time in protocol-defined clock ticks, wraps at 2^32
    pub timestamp: u32,
    payload: Bytes,
}

impl Frame {
    /// Fixed RTP header length; the layout is documented in the crate docs.
    pub const HEADER_LEN: usize = 12;

    /// Decodes a received datagram. The first byte (version / padding /
    ///  extension / CSRC count) and the synchronization source are not
    ///  surfaced; everything after the fixed header is the payload.
    pub fn parse(mut datagram: Bytes) -> Result<Frame, RtspError> {
        if datagram.len() < Self::HEADER_LEN {
            return Err(RtspError::MalformedFrame(datagram.len()));
        }

        let _flags = datagram.get_u8();
        let b1 = datagram.get_u8();
        let marker = (b1 & 0x80) != 0;
        let payload_type = b1 & 0x7f;
        let sequence_number = datagram.get_u16();
        let timestamp = datagram.get_u32();
        let _ssrc = datagram.get_u32();

        Ok(Frame {
            payload_type,
            marker,
            sequence_number,
            timestamp,
            payload: datagram,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Consumer of successfully decoded frames, e.g. a renderer. Called
///  synchronously on the receive task's execution context, so implementations
///  must not block significantly.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameSink: Send + Sync + 'static {
    async fn on_frame(&self, frame: &Frame);
}
