/// Errors raised while encoding or decoding envelopes.
///
/// Every variant describes the offending input; none of them imply the
/// byte stream that carried the envelope is damaged.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Message names must not be empty.
    #[error("message name is empty")]
    EmptyName,

    /// A process identity is unusable.
    #[error("invalid process identity: {0}")]
    InvalidIdentity(String),

    /// A payload value's kind is not on the allow-list.
    #[error("value kind '{kind}' for key '{key}' is not allow-listed")]
    DisallowedKind { key: String, kind: String },

    /// The buffer ended before a field was complete.
    #[error("truncated input: need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A structural tag did not match what the layout requires here.
    #[error("unexpected tag 0x{tag:02x} (expected {expected})")]
    UnexpectedTag { tag: u8, expected: &'static str },

    /// A value-kind tag is not one this codec knows.
    #[error("unknown value kind tag 0x{0:02x}")]
    UnknownValueKind(u8),

    /// A string field is not valid UTF-8.
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// A boolean byte other than 0 or 1.
    #[error("invalid boolean byte 0x{0:02x}")]
    InvalidBool(u8),

    /// The same payload key appeared twice.
    #[error("duplicate payload key '{0}'")]
    DuplicateKey(String),

    /// A field exceeds its size limit.
    #[error("{what} too long ({len} bytes, max {max})")]
    TooLong {
        what: &'static str,
        len: usize,
        max: usize,
    },

    /// The payload has more entries than allowed.
    #[error("too many payload entries ({count}, max {max})")]
    TooManyEntries { count: usize, max: usize },

    /// Bytes left over after a complete envelope.
    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),

    /// A custom value body could not be (de)serialized.
    #[error("custom value JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
