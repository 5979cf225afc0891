use std::time::Duration;

/// All failure shapes a connection can surface to its caller.
///
/// Data-path problems are deliberately absent except for [`RtspError::MalformedFrame`]:
///  receive timeouts are the expected idle case, and other receive errors are logged
///  inside the receive task without failing the connection.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// The server name could not be resolved at all.
    #[error("cannot resolve server address '{0}'")]
    UnknownHost(String),

    /// Resolution succeeded but no connection could be established.
    #[error("cannot connect to server at {endpoint}: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection attempt did not complete within the configured timeout.
    #[error("connection attempt to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    /// The local datagram socket could not be created or configured during SETUP.
    #[error("could not create a data socket: {0}")]
    Transport(#[source] std::io::Error),

    /// The server answered a control request with a non-success status.
    #[error("server returned {code}: {message}")]
    Protocol { code: u16, message: String },

    /// Write or read failure on the control stream, or a structurally broken
    ///  response. The state machine stays at its pre-call state.
    #[error("control channel failure: {0}")]
    ControlIo(#[source] anyhow::Error),

    /// A datagram too short to hold the fixed frame header.
    #[error("datagram of {0} bytes is too short for a frame header")]
    MalformedFrame(usize),

    /// Operation on a connection after `close()`.
    #[error("connection is closed")]
    Closed,

    /// Rejected connection configuration.
    #[error("invalid configuration: {0}")]
    Config(#[source] anyhow::Error),
}
