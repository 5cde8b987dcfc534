// src/core/gossip/wire.rs

//! Length-delimited wire framing for gossip messages and channel snapshots.
//!
//! The payload encoding is `bincode` rather than protocol buffers: neither this
//! crate's lineage nor its sibling crates in this tree carry a protobuf
//! toolchain, while `bincode` is already used for the cluster gossip payloads,
//! so it is reused here as a compact, self-describing substitute.

use crate::core::errors::AlertError;
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

pub fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, AlertError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| AlertError::Encode(e.to_string()))
}

pub fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, AlertError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| AlertError::Decode(e.to_string()))
}

/// Frames a payload as a 4-byte big-endian length prefix followed by the bytes.
pub fn frame(payload: &[u8]) -> Result<BytesMut, AlertError> {
    if payload.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(AlertError::Encode("gossip frame too large".into()));
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf)
}

/// Reads a single length-delimited frame from an async reader.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, AlertError> {
    let len = reader.read_u32().await.map_err(AlertError::from)?;
    if len > MAX_FRAME_LEN {
        return Err(AlertError::Decode(format!("frame length {len} exceeds max")));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await.map_err(AlertError::from)?;
    Ok(buf)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<(), AlertError> {
    let frame = frame(payload)?;
    writer.write_all(&frame).await.map_err(AlertError::from)?;
    writer.flush().await.map_err(AlertError::from)?;
    Ok(())
}

/// Parses a single frame out of an in-memory buffer, if a complete one is present.
pub fn try_parse_frame(buf: &mut BytesMut) -> Option<Vec<u8>> {
    if buf.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
    if buf.len() < 4 + len {
        return None;
    }
    buf.advance(4);
    Some(buf.split_to(len).to_vec())
}
