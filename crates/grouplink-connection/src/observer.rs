use grouplink_message::{Message, ProcessIdentity};

use crate::error::MessagingError;

/// Receives messages decoded by a connection.
///
/// Called on the connection's reader threads, one thread per peer link.
/// Connections hold observers weakly; keep the `Arc` alive for as long as
/// delivery is wanted.
pub trait MessageObserver: Send + Sync {
    /// A message from `sender` was decoded.
    fn message_received(&self, message: Message, sender: &ProcessIdentity);

    /// A frame from `sender` could not be turned into a message. The link
    /// stays up.
    fn receive_failed(&self, error: MessagingError, sender: &ProcessIdentity) {
        tracing::warn!(peer = %sender, error = %error, "dropping undeliverable frame");
    }
}

/// Outcome of an admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Refuse the peer; the reason is sent back in the handshake response.
    Reject(String),
}

impl Admission {
    pub fn reject(reason: impl Into<String>) -> Self {
        Admission::Reject(reason.into())
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Admission::Accept)
    }
}

/// Decides whether a server admits an incoming peer.
///
/// Consulted once per handshake, on that stream's handshake thread. Any
/// `Fn(&ProcessIdentity) -> Admission` closure is a policy.
pub trait AdmissionPolicy: Send + Sync {
    fn admit(&self, peer: &ProcessIdentity) -> Admission;
}

impl<F> AdmissionPolicy for F
where
    F: Fn(&ProcessIdentity) -> Admission + Send + Sync,
{
    fn admit(&self, peer: &ProcessIdentity) -> Admission {
        self(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_policies() {
        let policy = |peer: &ProcessIdentity| {
            if peer.name() == "trusted" {
                Admission::Accept
            } else {
                Admission::reject("unknown peer")
            }
        };

        assert!(policy.admit(&ProcessIdentity::new("trusted", 1)).is_accept());
        assert_eq!(
            policy.admit(&ProcessIdentity::new("other", 2)),
            Admission::Reject("unknown peer".to_string())
        );
    }
}
