//! End-to-end flow against a scripted loopback server: the control channel is
//!  a real TCP stream, the data channel real UDP datagrams.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};

use rtsp_client::config::ConnectionConfig;
use rtsp_client::connection::{RtspConnection, State};
use rtsp_client::frame::{Frame, FrameSink};

#[derive(Default)]
struct CollectingSink {
    frames: Mutex<Vec<Frame>>,
}

#[async_trait]
impl FrameSink for CollectingSink {
    async fn on_frame(&self, frame: &Frame) {
        self.frames.lock().unwrap().push(frame.clone());
    }
}

fn rtp_datagram(seq: u16, timestamp: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0x80u8, 26];
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(&0x1234_5678u32.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Accepts one control connection and answers every request with 200. On PLAY
///  it sends three frames (the third one out of order) to the client's data
///  port; returns after TEARDOWN.
async fn run_server(listener: TcpListener) -> anyhow::Result<()> {
    let (stream, _) = listener.accept().await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut client_port: Option<u16> = None;

    loop {
        let mut request_lines = Vec::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let line = line.trim_end().to_string();
            if line.is_empty() {
                break;
            }
            request_lines.push(line);
        }
        let method = request_lines
            .first()
            .and_then(|l| l.split(' ').next())
            .unwrap_or("")
            .to_string();
        for line in &request_lines {
            if let Some(port) = line.strip_prefix("Transport: RTP/UDP; client_port= ") {
                client_port = Some(port.trim().parse()?);
            }
        }

        write_half.write_all(b"RTSP/1.0 200 OK\r\nSession: 4242\r\n\r\n").await?;

        match method.as_str() {
            "PLAY" => {
                let port = client_port.expect("PLAY before SETUP");
                let sender = UdpSocket::bind("127.0.0.1:0").await?;
                for (seq, timestamp) in [(1u16, 1000u32), (2, 2000), (3, 1500)] {
                    sender.send_to(&rtp_datagram(seq, timestamp, b"payload"), ("127.0.0.1", port)).await?;
                }
            }
            "TEARDOWN" => return Ok(()),
            _ => {}
        }
    }
}

fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        receive_timeout: Duration::from_millis(100),
        receive_poll_interval: Duration::from_millis(5),
        playback_tick: Duration::from_millis(5),
        ..ConnectionConfig::default()
    }
}

#[tokio::test]
async fn test_setup_play_receive_pause_teardown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(run_server(listener));

    let sink = Arc::new(CollectingSink::default());
    let connection = RtspConnection::connect("127.0.0.1", port, sink.clone(), test_config())
        .await
        .unwrap();

    connection.setup("movie.mov").await.unwrap();
    assert_eq!(connection.state().await, State::Ready);

    connection.play().await.unwrap();
    assert_eq!(connection.state().await, State::Playing);

    for _ in 0..200 {
        if sink.frames.lock().unwrap().len() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    {
        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].sequence_number, 1);
        assert_eq!(frames[0].timestamp, 1000);
        assert_eq!(frames[0].payload_type, 26);
        assert_eq!(frames[0].payload(), b"payload");
    }

    connection.pause().await.unwrap();
    assert_eq!(connection.state().await, State::Ready);

    connection.teardown().await.unwrap();
    assert_eq!(connection.state().await, State::Init);

    let finalized = connection.statistics().finalized_sessions();
    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].session_id, "4242");
    assert_eq!(finalized[0].media_name, "movie.mov");
    assert_eq!(finalized[0].frames_played, 3);
    assert_eq!(finalized[0].frames_out_of_order, 1);
    assert_eq!(finalized[0].request_count, 4);
    assert!(finalized[0].end_time.is_some());
    assert!(finalized[0].average_frame_rate() >= 0.0);

    let report = connection.report();
    assert!(report.contains("session 4242 (movie.mov)"));
    assert!(report.contains("frames out of order: 1"));

    connection.close().await;
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_close_without_a_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // server that accepts and then just holds the stream open
    let _server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let sink = Arc::new(CollectingSink::default());
    let connection = RtspConnection::connect("127.0.0.1", port, sink, test_config())
        .await
        .unwrap();

    // nothing was set up: close must not send anything and must not fail
    connection.close().await;
    connection.close().await;
    assert!(connection.statistics().finalized_sessions().is_empty());
}
