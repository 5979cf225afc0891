//! Client side of an RTSP/RTP media streaming pair: a text-framed control
//!  channel over TCP for session lifecycle (SETUP / PLAY / PAUSE / TEARDOWN),
//!  and a best-effort UDP data channel carrying timestamped media frames from
//!  the server to the client.
//!
//! ## Design notes
//!
//! * The client assumes a single unicast pair of endpoints that are already
//!   reachable - there is no NAT traversal and no congestion control. The data
//!   channel is receive-only and unordered; frames that arrive late or not at
//!   all are accounted for in the per-session statistics rather than recovered.
//! * A connection holds at most one live session at a time. Finalized sessions
//!   are kept append-only for reporting and never mutated again.
//! * All control operations serialize on a single connection-wide lock. The
//!   periodic receive task and the playback accrual task run on the tokio
//!   scheduler and share state through `Arc`s; cancelling either is guaranteed
//!   to complete before the resources it uses are released.
//!
//! ## Control channel
//!
//! Requests are text lines terminated by CRLF with a blank-line terminator:
//!
//! ```ascii
//! <METHOD> <resource> RTSP/1.0
//! CSeq: <request sequence number>
//! Transport: RTP/UDP; client_port= <port>     (SETUP only)
//! Session: <session id>                       (every request except SETUP)
//! ```
//!
//! The CSeq counter increments only after a request was fully written, so a
//!  failed write never consumes a sequence number. Responses consist of a
//!  status line (`RTSP/1.0 <code> <message>`) followed by a header map; any
//!  status other than 200 fails the calling operation.
//!
//! ## Data channel
//!
//! Each datagram starts with the fixed 12-byte RTP header, all numbers in
//!  network byte order (BE):
//!
//! ```ascii
//! 0:  version (2 bits) / padding / extension / CSRC count - ignored here
//! 1:  marker (1 bit), payload type (7 bits)
//! 2:  sequence number (u16, wraps at 65536)
//! 4:  presentation timestamp (u32, wraps at 2^32, clock ticks)
//! 8:  synchronization source (u32) - not surfaced
//! 12: payload, up to the received datagram length
//! ```
//!
//! Datagrams shorter than the header are dropped as malformed and never reach
//!  the frame consumer or the statistics.

pub mod config;
pub mod connection;
pub mod control;
pub mod error;
pub mod frame;
pub mod response;
pub mod ring_buffer;
pub mod stats;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor(unsafe)]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
