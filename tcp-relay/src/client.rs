use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result as AppResult};
use tokio::{
    io::{self, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::{ListenArgs, PublishArgs},
    error::Result,
    protocol::{Message, read_frame, read_handshake, write_publish},
};

/// A peer of the relay: validates the server greeting, then publishes and
/// receives frames.
pub struct RelayClient {
    receiver: ClientReceiver,
    publisher: ClientPublisher,
}

pub struct ClientReceiver {
    reader: BufReader<OwnedReadHalf>,
}

pub struct ClientPublisher {
    writer: OwnedWriteHalf,
}

impl RelayClient {
    pub async fn connect(server: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(server).await?;
        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        read_handshake(&mut reader).await?;

        Ok(Self {
            receiver: ClientReceiver { reader },
            publisher: ClientPublisher { writer },
        })
    }

    pub async fn publish(&mut self, channel: impl AsRef<[u8]>, payload: impl AsRef<[u8]>) -> Result<()> {
        self.publisher.publish(channel, payload).await
    }

    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        self.receiver.next_message().await
    }

    pub fn into_split(self) -> (ClientReceiver, ClientPublisher) {
        (self.receiver, self.publisher)
    }
}

impl ClientReceiver {
    /// `None` once the relay closes the connection cleanly.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        read_frame(&mut self.reader).await
    }
}

impl ClientPublisher {
    pub async fn publish(&mut self, channel: impl AsRef<[u8]>, payload: impl AsRef<[u8]>) -> Result<()> {
        let message = Message::new(channel.as_ref(), payload.as_ref());
        write_publish(&mut self.writer, &message).await
    }

    /// Raw access for callers that need to put arbitrary bytes on the wire.
    pub fn writer(&mut self) -> &mut OwnedWriteHalf {
        &mut self.writer
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

pub async fn run_publish(args: PublishArgs) -> AppResult<()> {
    let client = RelayClient::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);
    let (_receiver, mut publisher) = client.into_split();

    for sent in 0..args.count {
        if sent > 0 {
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }
        publisher
            .publish(&args.channel, &args.message)
            .await
            .context("publish failed")?;
        write_stdout(&format!("SEND: {}", args.channel)).await?;
    }

    if let Err(error) = publisher.shutdown().await {
        warn!(?error, "failed to shutdown publisher cleanly");
    }
    Ok(())
}

pub async fn run_listen(args: ListenArgs) -> AppResult<()> {
    let client = RelayClient::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    write_stdout(&format!("*** connected to {}", args.server)).await?;
    let (mut receiver, _publisher) = client.into_split();

    let mut received = 0usize;
    loop {
        if args.limit.is_some_and(|limit| received >= limit) {
            break;
        }
        select! {
            message = receiver.next_message() => {
                match message.context("failed to read from relay")? {
                    Some(message) => {
                        received += 1;
                        write_stdout(&render_message(&message)).await?;
                    }
                    None => {
                        write_stdout("*** relay closed the connection").await?;
                        break;
                    }
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    Ok(())
}

fn render_message(message: &Message) -> String {
    format!(
        "RECV: {} {}",
        message.channel_lossy(),
        String::from_utf8_lossy(&message.payload)
    )
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::{
        error::RelayError,
        protocol::{encode_handshake, encode_publish},
    };

    #[test]
    fn renders_channel_and_payload() {
        let line = render_message(&Message::new("TEST", "foobar"));
        assert_eq!(line, "RECV: TEST foobar");
    }

    #[tokio::test]
    async fn connect_rejects_foreign_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            socket.write_all(b"HTTP/1.1").await.expect("write");
        });

        let err = match RelayClient::connect(addr).await {
            Ok(_) => panic!("handshake should be rejected"),
            Err(err) => err,
        };
        assert!(matches!(err, RelayError::Handshake(_)), "got {err:?}");
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn publishes_and_receives_after_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            socket.write_all(&encode_handshake()).await.expect("greet");
            let echoed = read_frame(&mut socket).await.expect("read").expect("frame");
            let frame = encode_publish(&echoed).expect("encode");
            socket.write_all(&frame).await.expect("echo");
        });

        let mut client = RelayClient::connect(addr).await.expect("connect");
        client.publish("TEST", "foobar").await.expect("publish");
        let message = client.next_message().await.expect("read").expect("frame");
        assert_eq!(message, Message::new("TEST", "foobar"));
        server.await.expect("server task");
    }
}
