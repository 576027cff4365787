use std::{
    fmt, io,
    net::{Shutdown, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::{
    io::AsyncRead,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
};
use tracing::{debug, info, trace, warn};

use crate::{
    error::{RelayError, Result},
    protocol::{Message, encode_publish, read_frame, write_frame},
    relay::Relay,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Write side of one accepted peer, shared between its own decode loop and
/// every broadcaster that targets it.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    // Duplicate handle so the socket can be shut down without the write lock.
    closer: std::net::TcpStream,
    open: AtomicBool,
}

impl Connection {
    /// Wraps an accepted stream. The returned read half belongs to the decode loop.
    pub fn from_stream(id: ConnectionId, stream: TcpStream) -> io::Result<(Arc<Self>, OwnedReadHalf)> {
        let peer = stream.peer_addr()?;
        let std_stream = stream.into_std()?;
        let closer = std_stream.try_clone()?;
        let stream = TcpStream::from_std(std_stream)?;
        let (reader, writer) = stream.into_split();

        let connection = Arc::new(Self {
            id,
            peer,
            writer: Mutex::new(writer),
            closer,
            open: AtomicBool::new(true),
        });
        Ok((connection, reader))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub async fn send(&self, message: &Message) -> Result<()> {
        let frame = encode_publish(message)?;
        self.send_frame(&frame).await
    }

    /// Writes one pre-encoded frame. The per-connection lock keeps frames from
    /// concurrent broadcasters whole on the wire.
    pub async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(RelayError::SendFailure(io::ErrorKind::NotConnected.into()));
        }
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, frame)
            .await
            .map_err(RelayError::SendFailure)
    }

    /// Shuts the socket down in both directions. Only the first call does any
    /// work; it returns `true` for that caller.
    pub fn close(&self) -> bool {
        if !self.open.swap(false, Ordering::AcqRel) {
            return false;
        }
        match self.closer.shutdown(Shutdown::Both) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotConnected => {}
            Err(err) => debug!(connection = %self.id, error = ?err, "socket shutdown failed"),
        }
        true
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Decodes frames until the socket fails, relaying each one from this task.
/// On exit the socket is closed and the connection leaves the registry.
pub async fn run_decode_loop<R>(connection: Arc<Connection>, mut reader: R, relay: Relay)
where
    R: AsyncRead + Unpin,
{
    let id = connection.id();
    let reason = loop {
        match read_frame(&mut reader).await {
            Ok(Some(message)) => {
                trace!(
                    connection = %id,
                    channel = %message.channel_lossy(),
                    payload_len = message.payload.len(),
                    "publish received"
                );
                relay.broadcast(id, &message).await;
            }
            Ok(None) => break RelayError::ConnectionClosed,
            Err(err) => break err,
        }
    };

    match &reason {
        RelayError::ConnectionClosed => {
            info!(connection = %id, peer = %connection.peer(), "connection closed");
        }
        other => {
            warn!(connection = %id, peer = %connection.peer(), error = %other, "dropping connection");
        }
    }

    connection.close();
    if relay.registry().remove(id).await.is_none() {
        debug!(connection = %id, "connection already absent from registry");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use tokio::net::TcpListener;

    use super::*;

    /// A server-side connection plus the client socket talking to it.
    pub(crate) async fn loopback(id: u64) -> (Arc<Connection>, OwnedReadHalf, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let client = TcpStream::connect(addr).await.expect("connect");
        let (accepted, _) = listener.accept().await.expect("accept");
        let (connection, reader) =
            Connection::from_stream(ConnectionId::new(id), accepted).expect("wrap stream");
        (connection, reader, client)
    }
}
