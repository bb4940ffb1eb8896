use std::fmt;

use grouplink_message::{CodecError, ProcessIdentity};

/// Errors that can occur in connection operations.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// The outgoing message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encoding(CodecError),

    /// An incoming frame could not be decoded into a message.
    #[error("failed to decode message: {0}")]
    Decoding(CodecError),

    /// The connection is not valid, or the addressed peer is not connected.
    #[error("connection is not valid")]
    InvalidChannel,

    /// The server refused the handshake.
    #[error("admission rejected: {0}")]
    AdmissionRejected(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] grouplink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] grouplink_frame::FrameError),

    /// A frame arrived with a kind this connection does not handle.
    #[error("unexpected frame kind {0}")]
    UnexpectedFrameKind(u16),

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Handshake timed out.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The send was abandoned because its link closed first.
    #[error("operation cancelled")]
    Cancelled,

    /// A received envelope names a sender other than the handshaken peer.
    #[error("envelope sender {actual} does not match connected peer {expected}")]
    SenderMismatch {
        expected: ProcessIdentity,
        actual: ProcessIdentity,
    },

    /// One or more peers failed during a broadcast.
    #[error("{0}")]
    Broadcast(BroadcastFailure),
}

/// Per-peer failures collected from one broadcast, sorted by identity.
#[derive(Debug)]
pub struct BroadcastFailure {
    pub failures: Vec<(ProcessIdentity, MessagingError)>,
}

impl BroadcastFailure {
    /// Identities of the peers that failed.
    pub fn peers(&self) -> impl Iterator<Item = &ProcessIdentity> {
        self.failures.iter().map(|(peer, _)| peer)
    }
}

impl fmt::Display for BroadcastFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "broadcast failed for {} peer(s)", self.failures.len())?;
        for (i, (peer, err)) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{peer}: {err}")?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, MessagingError>;
