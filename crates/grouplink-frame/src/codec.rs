use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::{FrameError, Result};
use crate::kind::{CONTROL, MESSAGE};

/// Frame header: magic (2) + length (4) + kind (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "GL" (0x47 0x4C).
pub const MAGIC: [u8; 2] = [0x47, 0x4C];

/// Payload limit once a peer is admitted.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Default maximum payload size while a peer is still unauthenticated: 16 KiB.
pub const DEFAULT_MAX_HANDSHAKE_PAYLOAD: usize = 16 * 1024;

/// One self-delimiting unit read from or written to a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// How the payload is to be interpreted.
    pub kind: u16,
    /// The frame payload.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// A handshake frame.
    pub fn control(payload: impl Into<Bytes>) -> Self {
        Self::new(CONTROL, payload)
    }

    /// A message envelope frame.
    pub fn message(payload: impl Into<Bytes>) -> Self {
        Self::new(MESSAGE, payload)
    }

    /// Bytes this frame occupies on the wire.
    pub fn wire_size(&self) -> usize {
        self.payload.len() + HEADER_SIZE
    }
}

/// Append one frame to `dst`.
///
/// ```text
/// ┌──────────────┬───────────┬──────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ Kind     │ Payload          │
/// │ 0x47 0x4C    │ (4B LE)   │ (2B LE)  │ (Length bytes)   │
/// │ "GL"         │           │          │                  │
/// └──────────────┴───────────┴──────────┴─────────────────┘
/// ```
pub fn encode_frame(kind: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(payload.len() + HEADER_SIZE);
    dst.put_slice(&MAGIC);
    dst.put_u32_le(len);
    dst.put_u16_le(kind);
    dst.put_slice(payload);
    Ok(())
}

/// Take the next complete frame off the front of `src`.
///
/// `Ok(None)` means more bytes are needed; `src` is left untouched. The declared length
/// is checked against `max_payload` before waiting for the body, so a hostile
/// header cannot make the reader buffer unbounded input.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        debug!(magic = ?&src[0..2], "rejecting frame with bad magic");
        return Err(FrameError::InvalidMagic);
    }

    let mut header = &src[2..HEADER_SIZE];
    let payload_len = header.get_u32_le() as usize;
    let kind = header.get_u16_le();

    if payload_len > max_payload {
        debug!(kind, size = payload_len, max = max_payload, "rejecting oversized frame");
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { kind, payload }))
}

/// Limits applied by [`FrameReader`](crate::FrameReader) and
/// [`FrameWriter`](crate::FrameWriter).
///
/// The default has no socket timeouts; links block until the peer acts or
/// the stream is shut down.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    pub max_payload_size: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl FrameConfig {
    /// Tight limits for the unauthenticated handshake phase.
    pub fn handshake(max_payload_size: usize, timeout: Duration) -> Self {
        Self {
            max_payload_size,
            read_timeout: Some(timeout),
            write_timeout: Some(timeout),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
