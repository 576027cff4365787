//! Handshake and publish framing for the relay's TCP protocol.
//!
//! Every integer on the wire is a 32-bit big-endian value. After accepting a
//! socket the server writes `[MAGIC_SERVER][PROTOCOL_VERSION]`; from then on
//! both directions carry only publish frames:
//!
//! ```text
//! [MESSAGE_TYPE_PUBLISH][channel len][channel bytes][payload len][payload bytes]
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RelayError, Result, classify_read_error};

pub const MAGIC_SERVER: i32 = 0x2876_17FA;
pub const MAGIC_CLIENT: i32 = 0x2876_17FB;
pub const PROTOCOL_VERSION: i32 = 0x0100;
pub const MESSAGE_TYPE_PUBLISH: i32 = 1;

pub const HANDSHAKE_LEN: usize = 8;
/// Type tag plus the two length fields.
const FRAME_OVERHEAD: usize = 12;

/// One published (channel, payload) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(channel: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    pub fn channel_lossy(&self) -> String {
        String::from_utf8_lossy(&self.channel).into_owned()
    }

    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.channel.len() + self.payload.len()
    }

    /// Bytes accounted to throughput stats for one relayed message.
    pub fn relayed_bytes(&self) -> u64 {
        (self.channel.len() + self.payload.len() + 8) as u64
    }
}

pub fn encode_handshake() -> [u8; HANDSHAKE_LEN] {
    let mut out = [0u8; HANDSHAKE_LEN];
    out[..4].copy_from_slice(&MAGIC_SERVER.to_be_bytes());
    out[4..].copy_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    out
}

pub async fn write_handshake<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_handshake()).await?;
    writer.flush().await
}

/// Reads the server greeting and checks magic and version.
pub async fn read_handshake<R>(reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let magic = reader
        .read_i32()
        .await
        .map_err(|err| classify_read_error(err, true))?;
    if magic != MAGIC_SERVER {
        return Err(RelayError::Handshake(format!(
            "bad magic {magic:#010x}, expected {MAGIC_SERVER:#010x}"
        )));
    }

    let version = reader
        .read_i32()
        .await
        .map_err(|err| classify_read_error(err, true))?;
    if version != PROTOCOL_VERSION {
        return Err(RelayError::Handshake(format!(
            "unsupported protocol version {version:#x}"
        )));
    }

    Ok(())
}

/// Encodes a complete publish frame into one contiguous buffer so it can be
/// written with a single `write_all`.
pub fn encode_publish(message: &Message) -> Result<Vec<u8>> {
    let channel_len = wire_len(&message.channel, "channel")?;
    let payload_len = wire_len(&message.payload, "payload")?;

    let mut out = Vec::with_capacity(message.encoded_len());
    out.extend_from_slice(&MESSAGE_TYPE_PUBLISH.to_be_bytes());
    out.extend_from_slice(&channel_len.to_be_bytes());
    out.extend_from_slice(&message.channel);
    out.extend_from_slice(&payload_len.to_be_bytes());
    out.extend_from_slice(&message.payload);
    Ok(out)
}

fn wire_len(field: &[u8], name: &str) -> Result<i32> {
    i32::try_from(field.len()).map_err(|_| {
        RelayError::Framing(format!("{name} of {} bytes does not fit a frame", field.len()))
    })
}

pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

pub async fn write_publish<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_publish(message)?;
    write_frame(writer, &frame).await?;
    Ok(())
}

/// Reads one publish frame.
///
/// Returns `Ok(None)` when the peer closes cleanly between frames. A stream
/// that ends anywhere inside a frame is a [`RelayError::Framing`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 4];
    let first = reader
        .read(&mut tag)
        .await
        .map_err(|err| classify_read_error(err, false))?;
    if first == 0 {
        return Ok(None);
    }
    reader
        .read_exact(&mut tag[first..])
        .await
        .map_err(|err| classify_read_error(err, true))?;

    let message_type = i32::from_be_bytes(tag);
    if message_type != MESSAGE_TYPE_PUBLISH {
        return Err(RelayError::Framing(format!(
            "unknown message type {message_type}"
        )));
    }

    let channel = read_field(reader, "channel").await?;
    let payload = read_field(reader, "payload").await?;
    Ok(Some(Message { channel, payload }))
}

async fn read_field<R>(reader: &mut R, name: &str) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let declared = reader
        .read_i32()
        .await
        .map_err(|err| classify_read_error(err, true))?;
    let len = u64::try_from(declared)
        .map_err(|_| RelayError::Framing(format!("negative {name} length {declared}")))?;

    // Grow with the bytes that actually arrive instead of trusting the prefix.
    let mut buf = Vec::new();
    (&mut *reader)
        .take(len)
        .read_to_end(&mut buf)
        .await
        .map_err(|err| classify_read_error(err, true))?;

    if buf.len() as u64 != len {
        return Err(RelayError::Framing(format!(
            "{name} declared {len} bytes but stream ended after {}",
            buf.len()
        )));
    }
    Ok(buf)
}
