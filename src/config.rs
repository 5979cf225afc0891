use std::time::Duration;
use anyhow::bail;

/// Tunables for a single RTSP connection. [`ConnectionConfig::default()`] matches
///  the values the protocol was validated against; deviating is mostly useful for
///  tests that want the clock-driven parts to run fast.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound for the control-channel connect attempt, covering both name
    ///  resolution and the TCP handshake.
    pub connect_timeout: Duration,

    /// Receive timeout on the data socket. Every poll of the data channel is
    ///  bounded by this, so the receive task never blocks indefinitely; an
    ///  expired timeout is the regular idle case, not an error.
    pub receive_timeout: Duration,

    /// Minimum delay between two receive attempts on the data socket.
    pub receive_poll_interval: Duration,

    /// Granularity of playback-time accrual while a session is playing.
    pub playback_tick: Duration,

    /// Size of the receive buffer for a single datagram. Datagrams are assumed
    ///  to be no larger than this.
    pub receive_buffer_len: usize,
}

impl Default for ConnectionConfig {
    fn default() -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(30),
            receive_timeout: Duration::from_secs(1),
            receive_poll_interval: Duration::from_millis(20),
            playback_tick: Duration::from_millis(20),
            receive_buffer_len: 15000,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.receive_buffer_len < crate::frame::Frame::HEADER_LEN {
            bail!("receive buffer cannot hold a frame header");
        }
        if self.receive_poll_interval.is_zero() {
            bail!("receive poll interval must be non-zero");
        }
        if self.playback_tick.is_zero() {
            bail!("playback tick must be non-zero");
        }
        Ok(())
    }
}
