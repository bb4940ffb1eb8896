use std::sync::{Arc, Mutex, Weak};
use std::thread;

use grouplink_frame::{Frame, FrameReader, FrameWriter};
use grouplink_message::{Message, ProcessIdentity};
use grouplink_transport::{TransportError, UnixDomainSocket};
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::connection::{Connection, ConnectionCore};
use crate::error::{MessagingError, Result};
use crate::handshake::handshake_client;
use crate::link::{LinkHandler, PeerLink};
use crate::sync::lock;

/// A single outbound connection to a [`ServerConnection`](crate::ServerConnection).
///
/// `start` connects and announces the configured local identity on a worker
/// thread. A server that refuses admission leaves the client `Invalid` with
/// [`MessagingError::AdmissionRejected`] as its last error. Losing the server
/// also invalidates the client; there is no automatic reconnect.
///
/// Dropping the client invalidates it.
pub struct ClientConnection {
    shared: Arc<ClientShared>,
}

struct ClientShared {
    core: ConnectionCore,
    link: Mutex<Option<Arc<PeerLink>>>,
    server_identity: Mutex<Option<ProcessIdentity>>,
}

impl ClientConnection {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                core: ConnectionCore::new(config),
                link: Mutex::new(None),
                server_identity: Mutex::new(None),
            }),
        }
    }

    /// Send `message` to the server.
    ///
    /// Completes with [`MessagingError::InvalidChannel`] unless the client is
    /// valid, with `Encoding` if the message cannot be encoded, and with
    /// `Ok(())` once the frame is on the wire.
    pub fn send_message<F>(&self, message: &Message, completion: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let link = if self.is_valid() {
            lock(&self.shared.link).clone()
        } else {
            None
        };
        let Some(link) = link else {
            completion(Err(MessagingError::InvalidChannel));
            return;
        };

        match self.shared.core.encode(message) {
            Ok(frame) => link.enqueue(frame, Box::new(completion)),
            Err(err) => completion(Err(err)),
        }
    }

    /// Identity the server announced in the handshake of the current run.
    pub fn server_identity(&self) -> Option<ProcessIdentity> {
        lock(&self.shared.server_identity).clone()
    }
}

impl Connection for ClientConnection {
    fn core(&self) -> &ConnectionCore {
        &self.shared.core
    }

    fn start(&self) {
        let epoch = self.shared.core.lifecycle().begin_start();
        lock(&self.shared.server_identity).take();
        // An invalidate racing this start may not have released its link yet.
        if let Some(stale) = self.shared.take_link_if(|linked| linked < epoch) {
            debug!(stale_epoch = stale.epoch(), "closing link of an earlier run");
            stale.close();
        }

        let worker = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("grouplink-connect".to_string())
            .spawn(move || {
                if let Err(err) = worker.connect(epoch) {
                    match &err {
                        MessagingError::AdmissionRejected(reason) => {
                            info!(reason = %reason, "server rejected admission")
                        }
                        other => warn!(error = %other, "connect failed"),
                    }
                    worker.shutdown(Some(epoch), Some(err));
                }
            });
        if let Err(err) = spawned {
            self.shared
                .shutdown(Some(epoch), Some(TransportError::Io(err).into()));
        }
    }

    fn invalidate(&self) {
        self.shared.shutdown(None, None);
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.shared.shutdown(None, None);
    }
}

impl ClientShared {
    fn shutdown(&self, epoch: Option<u64>, error: Option<MessagingError>) {
        let Some(ended) = self.core.lifecycle().invalidate(epoch, error) else {
            return;
        };
        // A newer run's link stays in place.
        if let Some(link) = self.take_link_if(|linked| linked == ended) {
            link.close();
        }
    }

    /// Take the current link if its epoch satisfies `matches`.
    fn take_link_if(&self, matches: impl FnOnce(u64) -> bool) -> Option<Arc<PeerLink>> {
        let mut slot = lock(&self.link);
        match slot.as_ref() {
            Some(link) if matches(link.epoch()) => slot.take(),
            _ => None,
        }
    }

    /// Publish `link` as the current link unless `epoch` already ended.
    fn install_link(&self, epoch: u64, link: &Arc<PeerLink>, server: &ProcessIdentity) -> bool {
        let mut slot = lock(&self.link);
        if !self.core.lifecycle().is_live(epoch) {
            return false;
        }
        if let Some(previous) = slot.replace(Arc::clone(link)) {
            previous.close();
        }
        *lock(&self.server_identity) = Some(server.clone());
        true
    }

    fn connect(self: &Arc<Self>, epoch: u64) -> Result<()> {
        let config = self.core.config();
        let stream = UnixDomainSocket::connect_namespace(
            &config.runtime_dir,
            &config.namespace,
            config.connection_id,
        )?;

        let handshake_frames = config.handshake.frame_config();
        let mut reader = FrameReader::with_config_ipc(stream.try_clone()?, handshake_frames.clone())?;
        let mut writer = FrameWriter::with_config_ipc(stream, handshake_frames)?;

        let server = handshake_client(
            &mut reader,
            &mut writer,
            &config.local_identity,
            &config.handshake,
        )?;

        // Handshake limits are for unauthenticated peers only.
        reader.reconfigure(config.frame.clone())?;
        writer.reconfigure(config.frame.clone())?;

        let (link, io) = PeerLink::new(epoch, epoch, server.clone(), reader, writer)?;
        if !self.install_link(epoch, &link, &server) {
            link.close();
            debug!("client invalidated during handshake");
            return Ok(());
        }

        let handler: Arc<dyn LinkHandler> = Arc::new(ClientLinkHandler {
            shared: Arc::downgrade(self),
            epoch,
        });
        io.spawn(&link, handler)?;

        if self.core.lifecycle().mark_valid(epoch) {
            info!(server = %server, identity = %config.local_identity, "connected");
        } else {
            link.close();
        }
        Ok(())
    }
}

struct ClientLinkHandler {
    shared: Weak<ClientShared>,
    epoch: u64,
}

impl LinkHandler for ClientLinkHandler {
    fn frame_received(&self, link: &PeerLink, frame: Frame) {
        if let Some(shared) = self.shared.upgrade() {
            shared.core.deliver(frame, link.identity());
        }
    }

    fn link_closed(&self, link: &PeerLink, error: Option<MessagingError>) {
        let (Some(shared), Some(error)) = (self.shared.upgrade(), error) else {
            return;
        };
        info!(server = %link.identity(), reason = %error, "lost connection to server");
        shared.shutdown(Some(self.epoch), Some(error));
    }
}
