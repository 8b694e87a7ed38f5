use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use thiserror::Error;

// A Failed reason is the largest payload; anything bigger than this is a
// corrupted frame, not a legitimate message.
const MAX_FRAME_BYTES: u32 = 4096;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("control channel closed")]
    Closed,

    #[error("timed out waiting on control channel")]
    TimedOut,

    #[error("control channel I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("malformed control message: {0}")]
    Codec(String),
}

/// Coordinator-to-worker messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Request {
    /// Evaluate the position snapshot identified by `snapshot`, already
    /// published to the worker's position buffer.
    Evaluate { snapshot: u64 },
    /// Release buffer attachments and exit.
    Stop,
}

/// Worker-to-coordinator acknowledgments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Reply {
    /// Forces and energy for `snapshot` are in the output buffers.
    Done { snapshot: u64 },
    /// The evaluation failed; the output buffers were not touched.
    Failed { reason: String },
}

fn classify(err: io::Error) -> ProtocolError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => ProtocolError::Closed,
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ProtocolError::TimedOut,
        _ => ProtocolError::Io(err),
    }
}

pub(crate) fn send<T: Serialize>(stream: &mut UnixStream, message: &T) -> Result<(), ProtocolError> {
    let payload = bincode::serialize(message).map_err(|e| ProtocolError::Codec(e.to_string()))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_BYTES)
        .ok_or_else(|| ProtocolError::Codec(format!("{}-byte frame exceeds limit", payload.len())))?;
    stream.write_all(&len.to_le_bytes()).map_err(classify)?;
    stream.write_all(&payload).map_err(classify)?;
    Ok(())
}

pub(crate) fn recv<T: DeserializeOwned>(stream: &mut UnixStream) -> Result<T, ProtocolError> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).map_err(classify)?;
    let len = u32::from_le_bytes(header);
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::Codec(format!(
            "{len}-byte frame exceeds limit"
        )));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).map_err(classify)?;
    bincode::deserialize(&payload).map_err(|e| ProtocolError::Codec(e.to_string()))
}
