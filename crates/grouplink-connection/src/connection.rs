use std::sync::mpsc::Receiver;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use grouplink_frame::{Frame, MESSAGE};
use grouplink_message::{decode_envelope, encode_envelope, AllowList, Message, ProcessIdentity};
use tracing::debug;

use crate::config::EndpointConfig;
use crate::error::{MessagingError, Result};
use crate::lifecycle::{ConnectionState, Lifecycle};
use crate::observer::MessageObserver;
use crate::sync::{read, write};

/// State every connection carries regardless of role: configuration,
/// lifecycle, allow-list and observer.
pub struct ConnectionCore {
    config: EndpointConfig,
    lifecycle: Lifecycle,
    allow_list: RwLock<AllowList>,
    observer: RwLock<Option<Weak<dyn MessageObserver>>>,
}

impl ConnectionCore {
    pub(crate) fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(),
            allow_list: RwLock::new(AllowList::default()),
            observer: RwLock::new(None),
        }
    }

    pub(crate) fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub(crate) fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn observer(&self) -> Option<Arc<dyn MessageObserver>> {
        read(&self.observer).as_ref().and_then(Weak::upgrade)
    }

    /// Encode `message` as sent by this endpoint under the current allow-list.
    pub(crate) fn encode(&self, message: &Message) -> Result<Bytes> {
        encode_envelope(
            &self.config.local_identity,
            message,
            &read(&self.allow_list),
        )
        .map_err(MessagingError::Encoding)
    }

    /// Decode a frame from `sender` and hand the result to the observer.
    pub(crate) fn deliver(&self, frame: Frame, sender: &ProcessIdentity) {
        let outcome = if frame.kind == MESSAGE {
            decode_envelope(&frame.payload, &read(&self.allow_list))
                .map_err(MessagingError::Decoding)
                .and_then(|envelope| {
                    if envelope.sender == *sender {
                        Ok(envelope.message)
                    } else {
                        Err(MessagingError::SenderMismatch {
                            expected: sender.clone(),
                            actual: envelope.sender,
                        })
                    }
                })
        } else {
            Err(MessagingError::UnexpectedFrameKind(frame.kind))
        };

        let Some(observer) = self.observer() else {
            debug!(peer = %sender, "no observer registered; dropping frame");
            return;
        };

        match outcome {
            Ok(message) => {
                debug!(peer = %sender, name = %message.name, "message received");
                observer.message_received(message, sender);
            }
            Err(error) => {
                debug!(peer = %sender, error = %error, "frame not deliverable");
                observer.receive_failed(error, sender);
            }
        }
    }
}

/// Capabilities shared by [`ServerConnection`](crate::ServerConnection) and
/// [`ClientConnection`](crate::ClientConnection).
///
/// No method blocks on the transport. Work happens on threads the
/// connection owns; results arrive through completions, the observer,
/// state subscriptions and the invalidation handler.
pub trait Connection: Send + Sync {
    #[doc(hidden)]
    fn core(&self) -> &ConnectionCore;

    /// Begin connecting (client) or listening (server).
    ///
    /// The connection becomes `Pending` at once, then `Valid` on success or
    /// `Invalid` on failure, with the cause in [`last_error`](Self::last_error).
    ///
    /// # Panics
    ///
    /// Panics if the connection is `Pending` or `Valid`.
    fn start(&self);

    /// Tear the connection down. Idempotent.
    fn invalidate(&self);

    fn state(&self) -> ConnectionState {
        self.core().lifecycle().state()
    }

    fn is_valid(&self) -> bool {
        self.state() == ConnectionState::Valid
    }

    /// Receive every subsequent state change. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> Receiver<ConnectionState> {
        self.core().lifecycle().subscribe()
    }

    /// Block until the connection is in `state`, or `timeout` passes.
    fn wait_for_state(&self, state: ConnectionState, timeout: Duration) -> bool {
        self.core().lifecycle().wait_for(state, timeout)
    }

    /// Why the connection last became `Invalid`, if it was not asked to.
    fn last_error(&self) -> Option<Arc<MessagingError>> {
        self.core().lifecycle().last_error()
    }

    /// Run `handler` each time the connection becomes `Invalid`.
    ///
    /// Fires exactly once per transition, on whichever thread caused it.
    fn set_invalidation_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
        Self: Sized,
    {
        self.core().lifecycle().set_handler(Some(Arc::new(handler)));
    }

    fn clear_invalidation_handler(&self) {
        self.core().lifecycle().set_handler(None);
    }

    /// Deliver decoded messages to `observer`. Held weakly.
    fn set_observer(&self, observer: &Arc<dyn MessageObserver>) {
        *write(&self.core().observer) = Some(Arc::downgrade(observer));
    }

    fn clear_observer(&self) {
        *write(&self.core().observer) = None;
    }

    /// Replace the allow-list used for subsequent encodes and decodes.
    fn set_allow_list(&self, allow_list: AllowList) {
        *write(&self.core().allow_list) = allow_list;
    }

    fn allow_list(&self) -> AllowList {
        read(&self.core().allow_list).clone()
    }

    fn local_identity(&self) -> &ProcessIdentity {
        &self.core().config().local_identity
    }

    fn config(&self) -> &EndpointConfig {
        self.core().config()
    }
}
