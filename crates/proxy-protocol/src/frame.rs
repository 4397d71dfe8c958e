//! Frame codec.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON body. Every
//! [`ProtocolMessage`](crate::ProtocolMessage) and
//! [`IncomingMessage`](crate::IncomingMessage) travels in exactly one frame.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Largest frame body accepted in either direction (64 MiB).
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Frame codec errors.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame of {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    #[error("connection closed mid-frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Encode `value` as one complete frame (prefix + body) in a single buffer.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(value)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge {
            size: body.len(),
            max: MAX_FRAME_BYTES,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    // Fits: MAX_FRAME_BYTES < u32::MAX
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a frame body (without prefix).
pub fn decode_frame<T: DeserializeOwned>(body: &[u8]) -> Result<T, FrameError> {
    Ok(serde_json::from_slice(body)?)
}

/// Write `value` as one frame and flush.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<(), FrameError> {
    let frame = encode_frame(value)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` if the stream ends cleanly before a header starts.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>, FrameError> {
    let mut header = [0u8; HEADER_LEN];
    let read = read_fully(reader, &mut header)?;
    if read == 0 {
        return Ok(None);
    }
    if read < HEADER_LEN {
        return Err(FrameError::Truncated {
            expected: HEADER_LEN,
            actual: read,
        });
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge {
            size: len,
            max: MAX_FRAME_BYTES,
        });
    }

    let mut body = vec![0u8; len];
    let read = read_fully(reader, &mut body)?;
    if read < len {
        return Err(FrameError::Truncated {
            expected: len,
            actual: read,
        });
    }

    decode_frame(&body).map(Some)
}

/// Like `read_exact`, but reports how much was read before EOF.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
