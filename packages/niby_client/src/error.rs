use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Errors a caller of [`SessionHandle`](crate::SessionHandle) can see.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The connection is not open. The message was echoed into the log but
    /// not transmitted; it is not queued for later.
    #[error("not connected")]
    NotConnected,

    /// The session actor has stopped.
    #[error("session has shut down")]
    SessionClosed,

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a connection ended. Logged and reported with the reconnect schedule,
/// never returned to callers.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("server is unavailable")]
    Unavailable,

    #[error("handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("closed by peer")]
    ClosedByPeer,

    #[error("read failed: {0}")]
    Read(#[source] tungstenite::Error),

    #[error("write failed: {0}")]
    Write(#[source] tungstenite::Error),
}

impl TransportError {
    /// Classify a handshake failure: refused/reset/aborted sockets mean the
    /// server is not there (yet); anything else is a handshake problem.
    pub fn from_handshake(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::Handshake(err)
        }
    }

    /// Classify a read failure. A peer that vanishes without a close frame
    /// is reported the same as an orderly close.
    pub fn from_read(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(
                tungstenite::error::ProtocolError::ResetWithoutClosingHandshake,
            ) => Self::ClosedByPeer,
            other => Self::Read(other),
        }
    }
}
