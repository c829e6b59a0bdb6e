//! Chunked message framing.
//!
//! A Bolt message travels as a sequence of `[u16 big-endian length][bytes]`
//! chunks closed by a zero-length chunk. Chunks never exceed 65 535 bytes
//! of payload. Empty chunks before any payload are keepalive noops and are
//! skipped.

use bytes::BytesMut;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum payload bytes per chunk.
pub const MAX_CHUNK_PAYLOAD: usize = 0xFFFF;

/// Upper bound on a single reassembled message. Anything larger is treated
/// as a protocol violation rather than buffered.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Framing failure. The connection lifts `Io`/`Timeout`/`Eof` into
/// *ConnectionLost* and `MessageTooLarge` into *ProtocolViolation*.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed mid-message")]
    Eof,

    #[error("message exceeds {MAX_MESSAGE_SIZE} bytes")]
    MessageTooLarge,
}

/// Write `payload` as chunks plus the terminating zero-length chunk.
pub async fn write_message<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    for chunk in payload.chunks(MAX_CHUNK_PAYLOAD) {
        writer.write_all(&(chunk.len() as u16).to_be_bytes()).await?;
        writer.write_all(chunk).await?;
    }
    writer.write_all(&[0, 0]).await?;
    writer.flush().await?;
    Ok(())
}

/// Read chunks until the zero-length terminator and return the reassembled
/// message. The whole read is guarded by `timeout`.
pub async fn read_message<R>(reader: &mut R, timeout: Duration) -> Result<BytesMut, FrameError>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(timeout, read_message_inner(reader)).await {
        Ok(result) => result,
        Err(_) => Err(FrameError::Timeout(timeout)),
    }
}

async fn read_message_inner<R>(reader: &mut R) -> Result<BytesMut, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut message = BytesMut::new();
    loop {
        let mut header = [0u8; 2];
        read_exact_or_eof(reader, &mut header).await?;
        let len = u16::from_be_bytes(header) as usize;

        if len == 0 {
            if message.is_empty() {
                // Keepalive noop between messages.
                continue;
            }
            return Ok(message);
        }

        if message.len() + len > MAX_MESSAGE_SIZE {
            return Err(FrameError::MessageTooLarge);
        }

        let start = message.len();
        message.resize(start + len, 0);
        read_exact_or_eof(reader, &mut message[start..]).await?;
    }
}

async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::Eof),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TIMEOUT: Duration = Duration::from_secs(1);

    async fn wire_roundtrip(payload: &[u8]) -> Vec<u8> {
        let mut wire = Vec::new();
        write_message(&mut wire, payload).await.unwrap();
        wire
    }

    #[tokio::test]
    async fn small_message_is_one_chunk() {
        let wire = wire_roundtrip(b"abc").await;
        assert_eq!(wire, vec![0, 3, b'a', b'b', b'c', 0, 0]);
    }

    #[tokio::test]
    async fn empty_message_is_just_a_terminator() {
        let wire = wire_roundtrip(b"").await;
        assert_eq!(wire, vec![0, 0]);
    }

    #[tokio::test]
    async fn large_message_splits_at_the_chunk_bound() {
        let payload = vec![0xAB; MAX_CHUNK_PAYLOAD + 10];
        let wire = wire_roundtrip(&payload).await;
        assert_eq!(&wire[..2], &[0xFF, 0xFF]);
        let second_header = &wire[2 + MAX_CHUNK_PAYLOAD..4 + MAX_CHUNK_PAYLOAD];
        assert_eq!(second_header, &[0, 10]);
        assert_eq!(&wire[wire.len() - 2..], &[0, 0]);

        let mut cursor = wire.as_slice();
        let back = read_message(&mut cursor, TEST_TIMEOUT).await.unwrap();
        assert_eq!(&back[..], &payload[..]);
    }

    #[tokio::test]
    async fn arbitrary_seams_reassemble() {
        // The same payload split at awkward seams by hand.
        let payload = b"hello world";
        let mut wire = Vec::new();
        for chunk in [&payload[..1], &payload[1..4], &payload[4..]] {
            wire.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
            wire.extend_from_slice(chunk);
        }
        wire.extend_from_slice(&[0, 0]);

        let mut cursor = wire.as_slice();
        let back = read_message(&mut cursor, TEST_TIMEOUT).await.unwrap();
        assert_eq!(&back[..], payload);
    }

    #[tokio::test]
    async fn noop_chunks_before_payload_are_skipped() {
        let mut wire = vec![0, 0, 0, 0];
        wire.extend_from_slice(&[0, 2, b'o', b'k', 0, 0]);
        let mut cursor = wire.as_slice();
        let back = read_message(&mut cursor, TEST_TIMEOUT).await.unwrap();
        assert_eq!(&back[..], b"ok");
    }

    #[tokio::test]
    async fn truncation_is_eof() {
        let wire = vec![0, 5, b'a', b'b'];
        let mut cursor = wire.as_slice();
        assert!(matches!(
            read_message(&mut cursor, TEST_TIMEOUT).await,
            Err(FrameError::Eof)
        ));
    }

    #[tokio::test]
    async fn stalled_reader_times_out() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(server.write_all(&[0, 5]).await);

        let mut client = client;
        let result = read_message(&mut client, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(FrameError::Timeout(_))));
    }

    #[tokio::test]
    async fn oversized_total_is_rejected() {
        // Headers alone describing more than MAX_MESSAGE_SIZE.
        let chunks = MAX_MESSAGE_SIZE / MAX_CHUNK_PAYLOAD + 2;
        let mut wire = Vec::new();
        for _ in 0..chunks {
            wire.extend_from_slice(&[0xFF, 0xFF]);
            wire.extend_from_slice(&vec![0u8; MAX_CHUNK_PAYLOAD]);
        }
        let mut cursor = wire.as_slice();
        assert!(matches!(
            read_message(&mut cursor, TEST_TIMEOUT).await,
            Err(FrameError::MessageTooLarge)
        ));
    }
}
