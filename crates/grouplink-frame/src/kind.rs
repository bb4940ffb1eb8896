//! Frame kinds.
//!
//! The kind tells the receiver how to interpret a payload. Unknown kinds
//! are still well-delimited, so a receiver can skip them without losing
//! stream synchronization.

/// Handshake documents (identity announce, admission verdict).
pub const CONTROL: u16 = 0;

/// Encoded message envelopes.
pub const MESSAGE: u16 = 1;

/// Returns a human-readable name for a frame kind.
pub fn kind_name(kind: u16) -> &'static str {
    match kind {
        CONTROL => "CONTROL",
        MESSAGE => "MESSAGE",
        _ => "UNKNOWN",
    }
}
