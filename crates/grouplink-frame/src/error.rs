use std::io;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// First two header bytes were not `"GL"`; the peer is not speaking grouplink.
    #[error("not a grouplink frame (bad magic)")]
    InvalidMagic,

    #[error("frame payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("frame I/O failed: {0}")]
    Io(#[from] io::Error),

    /// EOF, either between frames or partway through one.
    #[error("peer closed the stream")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
