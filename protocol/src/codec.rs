//! Message codec: framing and value serialization for the wire protocol.
//!
//! Every frame on the wire is `[u32 little-endian length][payload]`. Values
//! are encoded with bincode using little-endian varint integers, so lengths,
//! counts and the protocol version are varints, strings and byte strings are
//! length-prefixed, and `Option` carries a one-byte presence flag. Decoding
//! rejects trailing bytes.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ProtocolError;

/// Maximum frame payload size in bytes.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

/// Maximum payload size of a single handshake frame.
pub const HANDSHAKE_FRAME_LIMIT: usize = 1024;

/// Size of the length prefix in front of every frame.
pub const LENGTH_PREFIX_SIZE: usize = 4;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_little_endian()
        .with_varint_encoding()
        .with_limit(MAX_FRAME_SIZE as u64)
        .reject_trailing_bytes()
}

/// Encode a value into its wire bytes (no length prefix).
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    options()
        .serialize(value)
        .map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Decode a value from exactly `data`.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    options()
        .deserialize(data)
        .map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Prepend the 4-byte little-endian length prefix to `payload`.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Encode a value and frame it, ready to be written to a socket.
pub fn encode_frame<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    frame(&encode(value)?)
}

/// Decode one framed value from the front of `data`.
///
/// Returns the value and the number of bytes consumed (prefix included).
pub fn decode_framed<T: DeserializeOwned>(data: &[u8]) -> Result<(T, usize), ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Malformed("truncated length prefix".into()));
    }
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&data[..LENGTH_PREFIX_SIZE]);
    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    let end = LENGTH_PREFIX_SIZE + len;
    let body = data
        .get(LENGTH_PREFIX_SIZE..end)
        .ok_or_else(|| ProtocolError::Malformed("truncated frame body".into()))?;
    Ok((decode(body)?, end))
}

/// Read one frame payload from `reader`.
///
/// A clean end-of-stream before the length prefix is reported as
/// [`ProtocolError::Closed`]; a length above `max_len` is fatal.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::Closed)
        }
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(prefix) as usize;
    if len > max_len {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: max_len,
        });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Write one framed payload to `writer` and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let framed = frame(payload)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}
