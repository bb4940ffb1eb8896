//! Self-delimiting frames for grouplink.
//!
//! Every unit on the wire is framed with:
//! - A 2-byte magic number ("GL") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian frame kind
//!
//! The frame layer never looks inside payloads. Handshake documents travel
//! as [`CONTROL`] frames, encoded messages as [`MESSAGE`] frames.

pub mod codec;
pub mod error;
pub mod kind;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod tokio_codec;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_HANDSHAKE_PAYLOAD,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use kind::{kind_name, CONTROL, MESSAGE};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use tokio_codec::FrameCodec;
