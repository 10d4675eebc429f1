//! Bounded single-read, single-write message exchange.
//!
//! The protocol has no framing of its own: each request or response is
//! whatever one read call delivers, capped at the configured message size.
//! A delivery longer than the cap is truncated, and the rest of it is
//! discarded so that it is never mistaken for the next message.

use bytes::BytesMut;
use futures::FutureExt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Default bound on a single message, in bytes
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

/// Scratch space used while discarding an oversized delivery
const DISCARD_CHUNK: usize = 512;

/// Read one message of at most `max` bytes.
///
/// Returns `Ok(None)` when the peer has closed the connection. One trailing
/// line ending is stripped so line-oriented tools can talk to the server.
///
/// When the read fills the whole buffer, whatever else the peer has already
/// delivered is dropped. Peers wait for a response before sending again, so
/// those bytes can only belong to the message that was just cut short.
pub async fn read_message<R>(reader: &mut R, max: usize) -> io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::zeroed(max);
    let n = reader.read(&mut buffer[..]).await?;
    if n == 0 {
        return Ok(None);
    }
    buffer.truncate(n);

    if n == max {
        let dropped = discard_ready(reader);
        if dropped > 0 {
            debug!(max, dropped, "Message truncated at size bound");
        }
    }

    let raw = String::from_utf8_lossy(&buffer);
    let text = raw
        .strip_suffix("\r\n")
        .or_else(|| raw.strip_suffix('\n'))
        .unwrap_or(&raw[..]);

    Ok(Some(text.to_string()))
}

/// Drop every byte that can be read without waiting. Returns the count.
fn discard_ready<R>(reader: &mut R) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut scratch = [0u8; DISCARD_CHUNK];
    let mut dropped = 0;

    // EOF and errors stop the drain; the next read reports them.
    while let Some(Ok(n)) = reader.read(&mut scratch).now_or_never() {
        if n == 0 {
            break;
        }
        dropped += n;
    }

    dropped
}

/// Write one message in a single exchange.
pub async fn write_message<W>(writer: &mut W, message: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(message).await?;
    writer.flush().await
}
