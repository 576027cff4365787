use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{error, info, warn};

use crate::{
    connection::{Connection, ConnectionId, run_decode_loop},
    error::{RelayError, Result},
    protocol::write_handshake,
    relay::Relay,
};

/// Pause after accept errors that usually mean resource exhaustion.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub struct Acceptor {
    listener: TcpListener,
    relay: Relay,
    next_id: u64,
}

impl Acceptor {
    /// Binds every local interface on `port`.
    pub async fn listen(port: u16) -> Result<Self> {
        Self::bind(SocketAddr::from(([0, 0, 0, 0], port))).await
    }

    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        Ok(Self::new(listener))
    }

    pub fn new(listener: TcpListener) -> Self {
        Self::with_relay(listener, Relay::new())
    }

    pub fn with_relay(listener: TcpListener, relay: Relay) -> Self {
        Self {
            listener,
            relay,
            next_id: 1,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn relay(&self) -> Relay {
        self.relay.clone()
    }

    /// Accepts forever. Returns only when the listening socket fails.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts until `shutdown` resolves. Connections already running keep
    /// their decode loops; only new accepts stop.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Acceptor {
            listener,
            relay,
            mut next_id,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("acceptor shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &relay, &mut next_id).await?;
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    relay: &Relay,
    next_id: &mut u64,
) -> Result<()> {
    match result {
        Ok((stream, peer)) => {
            let id = ConnectionId::new(*next_id);
            *next_id += 1;
            admit(stream, peer, id, relay).await;
            Ok(())
        }
        Err(err) if is_fatal_accept_error(&err) => {
            error!(error = ?err, "listening socket failed");
            Err(RelayError::Listener(err))
        }
        Err(err) => {
            warn!(error = ?err, "failed to accept connection");
            if !is_connection_level(&err) {
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
            Ok(())
        }
    }
}

/// Greets the socket, registers it, and starts its decode loop.
async fn admit(mut stream: TcpStream, peer: SocketAddr, id: ConnectionId, relay: &Relay) {
    if let Err(err) = write_handshake(&mut stream).await {
        warn!(peer = %peer, error = ?err, "handshake write failed");
        return;
    }

    let (connection, reader) = match Connection::from_stream(id, stream) {
        Ok(parts) => parts,
        Err(err) => {
            warn!(peer = %peer, error = ?err, "failed to set up connection");
            return;
        }
    };

    // Register before the decode loop starts so its teardown always finds the entry.
    relay.registry().insert(Arc::clone(&connection)).await;
    info!(connection = %id, peer = %peer, "connection accepted");

    let relay = relay.clone();
    tokio::spawn(run_decode_loop(
        connection,
        tokio::io::BufReader::new(reader),
        relay,
    ));
}

/// Errors that mean the listening socket itself is unusable.
fn is_fatal_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported | io::ErrorKind::NotConnected
    )
}

/// Errors tied to the single socket being accepted.
fn is_connection_level(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::protocol::{HANDSHAKE_LEN, encode_handshake};

    #[tokio::test]
    async fn bind_conflict_is_a_bind_error() {
        let first = Acceptor::bind("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("first bind");
        let taken = first.local_addr().expect("local addr");

        let err = match Acceptor::bind(taken).await {
            Ok(_) => panic!("second bind on {taken} should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, RelayError::Bind { addr, .. } if addr == taken));
    }

    #[tokio::test]
    async fn accepted_socket_gets_handshake_and_is_registered() {
        let acceptor = Acceptor::bind("127.0.0.1:0".parse().expect("addr"))
            .await
            .expect("bind");
        let addr = acceptor.local_addr().expect("local addr");
        let relay = acceptor.relay();
        let server = tokio::spawn(acceptor.run());

        let mut client = TcpStream::connect(addr).await.expect("connect");
        let mut greeting = [0u8; HANDSHAKE_LEN];
        client.read_exact(&mut greeting).await.expect("handshake");
        assert_eq!(greeting, encode_handshake());

        for _ in 0..100 {
            if relay.registry().len().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(relay.registry().len().await, 1);

        drop(client);
        for _ in 0..100 {
            if relay.registry().is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(relay.registry().is_empty().await);

        server.abort();
    }

    #[test]
    fn accept_error_classes() {
        let reset = io::Error::from(io::ErrorKind::ConnectionAborted);
        assert!(!is_fatal_accept_error(&reset));
        assert!(is_connection_level(&reset));

        let broken = io::Error::from(io::ErrorKind::InvalidInput);
        assert!(is_fatal_accept_error(&broken));
    }
}
