use std::time::Duration;
use async_trait::async_trait;
use anyhow::Context;
#[cfg(test)] use mockall::automock;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info};

use crate::error::RtspError;
use crate::response::RtspResponse;

/// This is an abstraction for the control-channel transport, introduced to
///  facilitate mocking the I/O part away when testing the state machine.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlChannel: Send + Sync + 'static {
    /// Writes one fully framed request. The request either reaches the wire
    ///  completely or the call fails - there is no partial-write reporting.
    async fn send_request(&mut self, request: &str) -> anyhow::Result<()>;

    /// Reads one complete response off the stream.
    async fn read_response(&mut self) -> anyhow::Result<RtspResponse>;

    /// Releases the transport. Idempotent, never fails.
    async fn shutdown(&mut self);
}

/// The regular control channel: a TCP stream to the server.
pub struct TcpControlChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TcpControlChannel {
    /// Opens the control connection within `attempt_timeout`. No request is
    ///  sent at this point. Failure distinguishes name-resolution problems
    ///  from unreachable servers from an expired attempt timeout.
    pub async fn connect(server: &str, port: u16, attempt_timeout: Duration) -> Result<TcpControlChannel, RtspError> {
        let endpoint = format!("{}:{}", server, port);

        let stream = match tokio::time::timeout(attempt_timeout, Self::resolve_and_connect(server, port)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RtspError::ConnectTimeout {
                    endpoint,
                    timeout: attempt_timeout,
                })
            }
        };

        info!("control channel connected to {}", endpoint);
        let (read_half, write_half) = stream.into_split();
        Ok(TcpControlChannel {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    async fn resolve_and_connect(server: &str, port: u16) -> Result<TcpStream, RtspError> {
        let endpoint = format!("{}:{}", server, port);

        let addr = match lookup_host((server, port)).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => addr,
                None => return Err(RtspError::UnknownHost(endpoint)),
            },
            Err(_) => return Err(RtspError::UnknownHost(endpoint)),
        };

        TcpStream::connect(addr).await
            .map_err(|source| RtspError::Unreachable { endpoint, source })
    }
}

#[async_trait]
impl ControlChannel for TcpControlChannel {
    async fn send_request(&mut self, request: &str) -> anyhow::Result<()> {
        self.writer.write_all(request.as_bytes()).await
            .context("writing control request")?;
        self.writer.flush().await
            .context("flushing control request")?;
        Ok(())
    }

    async fn read_response(&mut self) -> anyhow::Result<RtspResponse> {
        RtspResponse::read(&mut self.reader).await
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("shutting down control channel: {}", e);
        }
    }
}
