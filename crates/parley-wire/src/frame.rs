//! Delimiter-based framing for lists of payloads.
//!
//! A framed list is written as `p1 SEP p2 SEP ... pn TERM`; the empty list is
//! a lone `TERM`. Payloads exchanged by Parley are compact JSON, which never
//! contains raw control bytes, so the two reserved bytes are taken from the
//! ASCII control range. Writers refuse payloads that contain either byte
//! rather than relying on that property.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Separates payloads inside a list (ASCII unit separator).
pub const SEPARATOR: u8 = 0x1F;

/// Ends a list (ASCII record separator).
pub const TERMINATOR: u8 = 0x1E;

/// Errors from reading or writing framed lists.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Stream closed before the frame terminator")]
    IncompleteFrame,
    #[error("Frame too large (max {max} bytes)")]
    TooLarge { max: usize },
    #[error("Payload {index} contains a reserved framing byte")]
    ReservedByte { index: usize },
}

/// Encode a list of payloads into its framed byte form.
pub fn encode_framed_list<P: AsRef<[u8]>>(payloads: &[P]) -> Result<Vec<u8>, FrameError> {
    let total: usize = payloads.iter().map(|p| p.as_ref().len() + 1).sum();
    let mut bytes = Vec::with_capacity(total.max(1));
    for (index, payload) in payloads.iter().enumerate() {
        let payload = payload.as_ref();
        if payload
            .iter()
            .any(|b| *b == SEPARATOR || *b == TERMINATOR)
        {
            return Err(FrameError::ReservedByte { index });
        }
        if index > 0 {
            bytes.push(SEPARATOR);
        }
        bytes.extend_from_slice(payload);
    }
    bytes.push(TERMINATOR);
    Ok(bytes)
}

/// Split a frame body (terminator already removed) into payloads.
pub fn decode_framed_list(body: &[u8]) -> Vec<Vec<u8>> {
    if body.is_empty() {
        return Vec::new();
    }
    body.split(|b| *b == SEPARATOR).map(<[u8]>::to_vec).collect()
}

/// Write a framed list and flush.
pub async fn write_framed_list<W, P>(writer: &mut W, payloads: &[P]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    P: AsRef<[u8]>,
{
    let bytes = encode_framed_list(payloads)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a single payload followed by the terminator, and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    write_framed_list(writer, &[payload]).await
}

/// Read one framed list. An empty frame yields an empty list.
pub async fn read_framed_list<R>(reader: &mut R, max: usize) -> Result<Vec<Vec<u8>>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let body = read_frame(reader, max).await?;
    Ok(decode_framed_list(&body))
}

/// Read the raw body of one frame, up to (and consuming) the terminator.
///
/// Fails with [`FrameError::IncompleteFrame`] if the stream ends first and
/// with [`FrameError::TooLarge`] once more than `max` bytes arrive without a
/// terminator.
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Vec<u8>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Err(FrameError::IncompleteFrame);
        }
        if let Some(pos) = available.iter().position(|b| *b == TERMINATOR) {
            if body.len() + pos > max {
                return Err(FrameError::TooLarge { max });
            }
            body.extend_from_slice(&available[..pos]);
            reader.consume(pos + 1);
            return Ok(body);
        }
        let len = available.len();
        if body.len() + len > max {
            return Err(FrameError::TooLarge { max });
        }
        body.extend_from_slice(available);
        reader.consume(len);
    }
}
