use std::{io, net::SocketAddr};

use thiserror::Error;

pub type Result<T, E = RelayError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The listening socket could not be created. Fatal at startup.
    #[error("failed to bind relay listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The listening socket itself failed while accepting. Fatal for the relay.
    #[error("relay listener failed")]
    Listener(#[source] io::Error),

    /// Malformed or truncated frame. Terminates that connection only.
    #[error("framing error: {0}")]
    Framing(String),

    /// Orderly or abrupt peer disconnect.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A write to one peer failed during broadcast.
    #[error("failed to send frame to peer")]
    SendFailure(#[source] io::Error),

    /// The server greeting did not match this protocol.
    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RelayError {
    /// True for errors that only end the connection they happened on.
    pub fn is_per_connection(&self) -> bool {
        matches!(
            self,
            RelayError::Framing(_) | RelayError::ConnectionClosed | RelayError::SendFailure(_)
        )
    }
}

/// Maps a socket read error onto the framing/closed split used by the decode loop.
pub(crate) fn classify_read_error(err: io::Error, mid_frame: bool) -> RelayError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof if mid_frame => {
            RelayError::Framing("stream ended inside a frame".to_string())
        }
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => RelayError::ConnectionClosed,
        _ => RelayError::Io(err),
    }
}
