use std::fmt::Write as _;
use std::sync::Arc;
use anyhow::anyhow;
use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::control::{ControlChannel, TcpControlChannel};
use crate::error::RtspError;
use crate::frame::{Frame, FrameSink};
use crate::response::RtspResponse;
use crate::stats::SessionStatistics;

const RTSP_VERSION: &str = "RTSP/1.0";
const CRLF: &str = "\r\n";

/// Control-channel lifecycle state of a connection.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum State {
    /// no active media session
    Init,
    /// session established, not streaming
    Ready,
    /// session established and streaming
    Playing,
}

/// A client connection to an RTSP server: the control-channel state machine
///  plus the periodic datagram receive task while playing.
///
/// All control operations serialize on one connection-wide lock, so state
///  transitions never interleave. Operations called in a state they are not
///  valid for are silent no-ops (and consume no request sequence number);
///  operations that reach the server and get a non-success status fail with
///  [`RtspError::Protocol`] and leave the state unchanged.
pub struct RtspConnection {
    inner: Arc<Mutex<ConnectionInner>>,
    stats: SessionStatistics,
}

struct ConnectionInner {
    config: Arc<ConnectionConfig>,
    control: Box<dyn ControlChannel>,
    frame_sink: Arc<dyn FrameSink>,
    stats: SessionStatistics,
    state: State,
    closed: bool,
    /// request sequence counter; incremented only after a request was fully written
    cseq: u32,
    session_id: Option<String>,
    media_name: Option<String>,
    data_socket: Option<Arc<UdpSocket>>,
    receive_task: Option<JoinHandle<()>>,
}

impl RtspConnection {
    /// Establishes the control connection to the server. No request is sent
    ///  at this point, and no stream is set up.
    pub async fn connect(
        server: &str,
        port: u16,
        frame_sink: Arc<dyn FrameSink>,
        config: ConnectionConfig,
    ) -> Result<RtspConnection, RtspError> {
        let control = TcpControlChannel::connect(server, port, config.connect_timeout).await?;
        Self::with_control_channel(Box::new(control), frame_sink, config)
    }

    /// Builds a connection on top of an already-open control channel. This is
    ///  the seam for driving the state machine against a scripted or mocked
    ///  control transport.
    pub fn with_control_channel(
        control: Box<dyn ControlChannel>,
        frame_sink: Arc<dyn FrameSink>,
        config: ConnectionConfig,
    ) -> Result<RtspConnection, RtspError> {
        config.validate().map_err(RtspError::Config)?;

        let stats = SessionStatistics::new(config.playback_tick);
        Ok(RtspConnection {
            inner: Arc::new(Mutex::new(ConnectionInner {
                config: Arc::new(config),
                control,
                frame_sink,
                stats: stats.clone(),
                state: State::Init,
                closed: false,
                cseq: 0,
                session_id: None,
                media_name: None,
                data_socket: None,
                receive_task: None,
            })),
            stats,
        })
    }

    /// Sends a SETUP request for `media_name` and establishes the datagram
    ///  socket the server will stream to. Valid only in `Init`; a no-op
    ///  otherwise. On success the connection holds a fresh session and is
    ///  `Ready`.
    pub async fn setup(&self, media_name: &str) -> Result<(), RtspError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(RtspError::Closed);
        }
        if inner.state != State::Init {
            debug!("setup() in state {:?} - ignoring", inner.state);
            return Ok(());
        }

        // ephemeral local port; every receive on it is bounded by the
        // configured timeout so polling never blocks indefinitely
        let socket = UdpSocket::bind("0.0.0.0:0").await
            .map_err(RtspError::Transport)?;
        let local_port = socket.local_addr()
            .map_err(RtspError::Transport)?
            .port();

        inner.send_command("SETUP", media_name, Some(local_port)).await?;
        // on any failure from here on, `socket` is dropped and the state is untouched
        let response = inner.read_checked_response().await?;

        let session_id = response.header_value("Session")
            .ok_or_else(|| RtspError::ControlIo(anyhow!("SETUP response without a Session header")))?
            .to_string();

        info!("session {} established for '{}' (data port {})", session_id, media_name, local_port);
        inner.stats.begin_session(&session_id, media_name);
        inner.session_id = Some(session_id);
        inner.media_name = Some(media_name.to_string());
        inner.data_socket = Some(Arc::new(socket));
        inner.state = State::Ready;
        Ok(())
    }

    /// Sends a PLAY request for the current session and starts the periodic
    ///  receive task and playback-time accrual. Valid only in `Ready`; a
    ///  no-op otherwise.
    pub async fn play(&self) -> Result<(), RtspError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(RtspError::Closed);
        }
        if inner.state != State::Ready {
            debug!("play() in state {:?} - ignoring", inner.state);
            return Ok(());
        }

        let media_name = inner.media_name.clone()
            .expect("Ready state implies a media name");

        inner.send_command("PLAY", &media_name, None).await?;
        inner.read_checked_response().await?;

        let socket = inner.data_socket.clone()
            .expect("Ready state implies a data socket");
        inner.receive_task = Some(tokio::spawn(receive_loop(
            socket,
            inner.frame_sink.clone(),
            inner.stats.clone(),
            inner.config.clone(),
        )));
        inner.stats.begin_playback();
        inner.state = State::Playing;
        info!("playing '{}'", media_name);
        Ok(())
    }

    /// Sends a PAUSE request and cancels the receive task and accrual. Valid
    ///  only in `Playing`; a no-op otherwise. When this returns, no further
    ///  receive tick fires.
    pub async fn pause(&self) -> Result<(), RtspError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(RtspError::Closed);
        }
        if inner.state != State::Playing {
            debug!("pause() in state {:?} - ignoring", inner.state);
            return Ok(());
        }

        let media_name = inner.media_name.clone()
            .expect("Playing state implies a media name");

        inner.send_command("PAUSE", &media_name, None).await?;
        inner.read_checked_response().await?;

        inner.cancel_receive_task().await;
        inner.stats.pause_playback();
        inner.state = State::Ready;
        info!("paused '{}'", media_name);
        Ok(())
    }

    /// Sends a TEARDOWN request and finalizes the session: records the final
    ///  request count, cancels any receive task, stamps the session's end
    ///  time and closes the datagram socket. Valid in `Ready` and `Playing`;
    ///  a no-op in `Init`. A further `setup()` on the same connection is
    ///  accepted afterwards.
    pub async fn teardown(&self) -> Result<(), RtspError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(RtspError::Closed);
        }
        if inner.state == State::Init {
            debug!("teardown() without a session - ignoring");
            return Ok(());
        }

        let media_name = inner.media_name.clone()
            .expect("non-Init state implies a media name");

        inner.send_command("TEARDOWN", &media_name, None).await?;
        inner.read_checked_response().await?;

        inner.stats.set_request_count(inner.cseq);
        // cancel strictly before the socket is released
        inner.cancel_receive_task().await;
        inner.stats.end_session();
        inner.data_socket = None;
        inner.session_id = None;
        inner.media_name = None;
        inner.cseq = 0;
        inner.state = State::Init;
        info!("session for '{}' torn down", media_name);
        Ok(())
    }

    /// Idempotent shutdown: attempts an orderly teardown (swallowing its
    ///  failure), then releases the data socket and the control transport
    ///  regardless of the outcome. Never fails; safe to call repeatedly.
    pub async fn close(&self) {
        if let Err(e) = self.teardown().await {
            debug!("teardown during close failed: {}", e);
        }

        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }

        inner.cancel_receive_task().await;
        inner.stats.pause_playback();
        inner.data_socket = None;
        inner.control.shutdown().await;
        inner.closed = true;
        inner.state = State::Init;
        info!("connection closed");
    }

    /// Human-readable statistics for every finalized session of this connection.
    pub fn report(&self) -> String {
        self.stats.report()
    }

    pub fn statistics(&self) -> &SessionStatistics {
        &self.stats
    }

    pub async fn state(&self) -> State {
        self.inner.lock().await.state
    }

    /// number of control requests written so far in the current session
    pub async fn request_count(&self) -> u32 {
        self.inner.lock().await.cseq
    }
}

impl ConnectionInner {
    /// Frames and writes one control request. The `Transport` header is sent
    ///  only on SETUP (which never carries a `Session` header); every other
    ///  request carries the current session id.
    async fn send_command(&mut self, method: &str, resource: &str, transport_port: Option<u16>) -> Result<(), RtspError> {
        let mut request = format!("{} {} {}{}", method, resource, RTSP_VERSION, CRLF);
        let _ = write!(request, "CSeq: {}{}", self.cseq, CRLF);
        if let Some(port) = transport_port {
            let _ = write!(request, "Transport: RTP/UDP; client_port= {}{}", port, CRLF);
        }
        else if let Some(session_id) = &self.session_id {
            let _ = write!(request, "Session: {}{}", session_id, CRLF);
        }
        request.push_str(CRLF);

        trace!("sending control request:\n{}", request);
        self.control.send_request(&request).await
            .map_err(RtspError::ControlIo)?;

        // only count the request once it was fully written
        self.cseq += 1;
        Ok(())
    }

    async fn read_checked_response(&mut self) -> Result<RtspResponse, RtspError> {
        let response = self.control.read_response().await
            .map_err(RtspError::ControlIo)?;

        if !response.is_success() {
            return Err(RtspError::Protocol {
                code: response.code,
                message: response.message,
            });
        }
        Ok(response)
    }

    /// Cancels the receive task and waits for the cancellation to land: when
    ///  this returns, no further tick fires and the data socket can be
    ///  released safely.
    async fn cancel_receive_task(&mut self) {
        if let Some(handle) = self.receive_task.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

/// The periodic datagram receive task: one bounded receive attempt per tick.
///  A timeout is the regular idle case; any other receive error is logged and
///  the tick is treated as empty. The task itself never fails.
async fn receive_loop(
    socket: Arc<UdpSocket>,
    frame_sink: Arc<dyn FrameSink>,
    stats: SessionStatistics,
    config: Arc<ConnectionConfig>,
) {
    debug!("starting datagram receive loop");
    let mut ticks = interval(config.receive_poll_interval);

    loop {
        ticks.tick().await;

        let mut buf = BytesMut::zeroed(config.receive_buffer_len);
        match timeout(config.receive_timeout, socket.recv_from(buf.as_mut())).await {
            Err(_) => {
                // nothing arrived within the receive timeout - wait for the next tick
            }
            Ok(Err(e)) => {
                error!("data socket error: {}", e);
            }
            Ok(Ok((num_read, from))) => {
                buf.truncate(num_read);
                match Frame::parse(buf.freeze()) {
                    Ok(frame) => {
                        trace!("received frame #{} ({} payload bytes) from {:?}", frame.sequence_number, frame.payload().len(), from);
                        frame_sink.on_frame(&frame).await;
                        stats.record_frame(&frame);
                    }
                    Err(e) => {
                        warn!("dropping datagram from {:?}: {}", from, e);
                    }
                }
            }
        }
    }
}
