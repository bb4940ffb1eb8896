use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread;
use std::time::Duration;

use grouplink_frame::{Frame, FrameReader, FrameWriter};
use grouplink_message::{Message, ProcessIdentity};
use grouplink_transport::{IpcStream, PeerCredentials, TransportError, UnixDomainSocket};
use tracing::{debug, info, warn};

use crate::config::EndpointConfig;
use crate::connection::{Connection, ConnectionCore};
use crate::error::{MessagingError, Result};
use crate::handshake::handshake_server;
use crate::link::{self, Completion, LinkHandler, PeerLink};
use crate::observer::{Admission, AdmissionPolicy};
use crate::sync::{lock, read, write};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Accepts many clients and fans messages out to them.
///
/// Each incoming stream is handshaken on its own thread and admitted only if
/// the [`AdmissionPolicy`] says so; without a policy every peer is refused.
/// Admitted peers are keyed by their [`ProcessIdentity`], so a second
/// connection announcing an identity that is already connected is refused.
///
/// Dropping the server invalidates it.
pub struct ServerConnection {
    shared: Arc<ServerShared>,
}

struct ServerShared {
    core: ConnectionCore,
    admission: RwLock<Option<Weak<dyn AdmissionPolicy>>>,
    peers: Mutex<HashMap<ProcessIdentity, Arc<PeerLink>>>,
    next_link_id: AtomicU64,
}

impl ServerConnection {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                core: ConnectionCore::new(config),
                admission: RwLock::new(None),
                peers: Mutex::new(HashMap::new()),
                next_link_id: AtomicU64::new(1),
            }),
        }
    }

    /// Decide admission with `policy`. Held weakly.
    pub fn set_admission_policy(&self, policy: &Arc<dyn AdmissionPolicy>) {
        *write(&self.shared.admission) = Some(Arc::downgrade(policy));
    }

    pub fn clear_admission_policy(&self) {
        *write(&self.shared.admission) = None;
    }

    /// Send `message` to one connected peer.
    ///
    /// Completes with [`MessagingError::InvalidChannel`] if the server is not
    /// valid or `peer` is not connected, with `Encoding` if the message
    /// cannot be encoded, and with `Ok(())` once the frame is on the wire.
    pub fn send_message_to<F>(&self, message: &Message, peer: &ProcessIdentity, completion: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let link = if self.is_valid() {
            lock(&self.shared.peers).get(peer).cloned()
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

    /// Send `message` to every peer connected at call time.
    ///
    /// The message is encoded once. Peers are written to independently; the
    /// completion runs after all of them finished, with
    /// [`MessagingError::Broadcast`] listing every peer that failed. A message
    /// that cannot be encoded fails with `Encoding` even when no peers are
    /// connected; otherwise an empty peer table completes with `Ok(())`.
    pub fn broadcast_message<F>(&self, message: &Message, completion: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        if !self.is_valid() {
            completion(Err(MessagingError::InvalidChannel));
            return;
        }

        let frame = match self.shared.core.encode(message) {
            Ok(frame) => frame,
            Err(err) => {
                completion(Err(err));
                return;
            }
        };

        let snapshot: Vec<Arc<PeerLink>> = lock(&self.shared.peers).values().cloned().collect();
        if snapshot.is_empty() {
            completion(Ok(()));
            return;
        }
        link::broadcast(&snapshot, frame, Box::new(completion) as Completion);
    }

    /// Close one peer's link. Returns `false` if `peer` was not connected.
    pub fn disconnect_peer(&self, peer: &ProcessIdentity) -> bool {
        let Some(link) = lock(&self.shared.peers).remove(peer) else {
            return false;
        };
        info!(peer = %peer, "disconnecting peer");
        link.close();
        true
    }

    /// Identities of the connected peers, sorted.
    pub fn peers(&self) -> Vec<ProcessIdentity> {
        let mut peers: Vec<_> = lock(&self.shared.peers).keys().cloned().collect();
        peers.sort();
        peers
    }
}

impl Connection for ServerConnection {
    fn core(&self) -> &ConnectionCore {
        &self.shared.core
    }

    fn start(&self) {
        let shared = &self.shared;
        let epoch = shared.core.lifecycle().begin_start();
        // An invalidate racing this start may not have drained its peers yet.
        shared.close_links(|linked| linked < epoch);
        let config = shared.core.config();

        let socket = UnixDomainSocket::bind_namespace(
            &config.runtime_dir,
            &config.namespace,
            config.connection_id,
        )
        .and_then(|socket| {
            socket.set_nonblocking(true)?;
            Ok(socket)
        });
        let socket = match socket {
            Ok(socket) => socket,
            Err(err) => {
                warn!(namespace = %config.namespace, error = %err, "server failed to listen");
                shared.shutdown(Some(epoch), Some(err.into()));
                return;
            }
        };

        info!(
            path = ?socket.path(),
            identity = %config.local_identity,
            "server listening"
        );

        let acceptor = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name("grouplink-accept".to_string())
            .spawn(move || acceptor.accept_loop(socket, epoch));
        if let Err(err) = spawned {
            shared.shutdown(Some(epoch), Some(TransportError::Io(err).into()));
            return;
        }

        shared.core.lifecycle().mark_valid(epoch);
    }

    fn invalidate(&self) {
        self.shared.shutdown(None, None);
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.shared.shutdown(None, None);
    }
}

impl ServerShared {
    /// Invalidate and close every peer link admitted by the ended run.
    fn shutdown(&self, epoch: Option<u64>, error: Option<MessagingError>) {
        if let Some(ended) = self.core.lifecycle().invalidate(epoch, error) {
            self.close_links(|linked| linked == ended);
        }
    }

    /// Remove and close the peers whose admitting epoch satisfies `matches`.
    fn close_links(&self, matches: impl Fn(u64) -> bool) {
        let mut closing = Vec::new();
        lock(&self.peers).retain(|_, link| {
            let drop_it = matches(link.epoch());
            if drop_it {
                closing.push(Arc::clone(link));
            }
            !drop_it
        });
        if !closing.is_empty() {
            debug!(count = closing.len(), "closing peer links");
        }
        for link in closing {
            link.close();
        }
    }

    /// Add `link` to the table for the `epoch` run.
    ///
    /// Refused if that run already ended or already admitted the identity.
    /// A leftover entry from an earlier run is closed and replaced.
    fn insert_link(&self, epoch: u64, link: &Arc<PeerLink>) -> Result<()> {
        let mut peers = lock(&self.peers);
        if !self.core.lifecycle().is_live(epoch) {
            return Err(MessagingError::Disconnected(
                "server invalidated during handshake".to_string(),
            ));
        }
        let peer = link.identity();
        if peers.get(peer).is_some_and(|current| current.epoch() == epoch) {
            return Err(MessagingError::HandshakeFailed(format!(
                "identity {peer} connected concurrently"
            )));
        }
        if let Some(stale) = peers.insert(peer.clone(), Arc::clone(link)) {
            debug!(peer = %peer, stale_epoch = stale.epoch(), "replacing link of an earlier run");
            stale.close();
        }
        Ok(())
    }

    fn accept_loop(self: Arc<Self>, socket: UnixDomainSocket, epoch: u64) {
        while self.core.lifecycle().is_live(epoch) {
            match socket.try_accept() {
                Ok(Some(stream)) => {
                    let worker = Arc::clone(&self);
                    let spawned = thread::Builder::new()
                        .name("grouplink-handshake".to_string())
                        .spawn(move || worker.admit_stream(stream, epoch));
                    if let Err(err) = spawned {
                        warn!(error = %err, "could not spawn handshake worker; dropping stream");
                    }
                }
                Ok(None) => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(err) => {
                    warn!(error = %err, "accept failed; invalidating server");
                    self.shutdown(Some(epoch), Some(err.into()));
                    break;
                }
            }
        }
        debug!(path = ?socket.path(), "acceptor stopped");
    }

    fn admit_stream(self: Arc<Self>, stream: IpcStream, epoch: u64) {
        let credentials = stream.peer_credentials();
        match self.handshake(stream, credentials, epoch) {
            Ok(peer) => info!(peer = %peer, "peer admitted"),
            Err(MessagingError::AdmissionRejected(reason)) => {
                info!(reason = %reason, "peer rejected");
            }
            Err(err) => debug!(error = %err, "handshake failed"),
        }
    }

    fn handshake(
        self: &Arc<Self>,
        stream: IpcStream,
        credentials: Option<PeerCredentials>,
        epoch: u64,
    ) -> Result<ProcessIdentity> {
        let config = self.core.config();
        let handshake_frames = config.handshake.frame_config();
        let mut reader = FrameReader::with_config_ipc(stream.try_clone()?, handshake_frames.clone())?;
        let mut writer = FrameWriter::with_config_ipc(stream, handshake_frames)?;

        let peer = handshake_server(
            &mut reader,
            &mut writer,
            &config.local_identity,
            &config.handshake,
            |peer| self.admission_decision(peer, credentials, epoch),
        )?;

        // Handshake limits are for unauthenticated peers only.
        reader.reconfigure(config.frame.clone())?;
        writer.reconfigure(config.frame.clone())?;

        let id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        let (link, io) = PeerLink::new(id, epoch, peer.clone(), reader, writer)?;
        if let Err(err) = self.insert_link(epoch, &link) {
            link.close();
            return Err(err);
        }

        let handler: Arc<dyn LinkHandler> = Arc::new(ServerLinkHandler {
            shared: Arc::downgrade(self),
        });
        if let Err(err) = io.spawn(&link, handler) {
            self.remove_link(&link);
            link.close();
            return Err(err);
        }
        Ok(peer)
    }

    fn admission_decision(
        &self,
        peer: &ProcessIdentity,
        credentials: Option<PeerCredentials>,
        epoch: u64,
    ) -> std::result::Result<(), String> {
        if let Some(creds) = credentials {
            if creds.pid != peer.pid() {
                warn!(peer = %peer, actual_pid = creds.pid, "announced pid does not match socket peer");
                return Err(format!(
                    "announced pid {} does not match connecting process",
                    peer.pid()
                ));
            }
        }

        if !self.core.lifecycle().is_live(epoch) {
            return Err("server is shutting down".to_string());
        }

        let policy = read(&self.admission).as_ref().and_then(Weak::upgrade);
        let Some(policy) = policy else {
            return Err("server has no admission policy".to_string());
        };
        if let Admission::Reject(reason) = policy.admit(peer) {
            return Err(reason);
        }

        let duplicate = lock(&self.peers)
            .get(peer)
            .is_some_and(|current| current.epoch() == epoch);
        if duplicate {
            return Err(format!("identity {peer} is already connected"));
        }
        Ok(())
    }

    /// Drop `link` from the table if it is still the entry for its identity.
    fn remove_link(&self, link: &PeerLink) -> bool {
        let mut peers = lock(&self.peers);
        match peers.get(link.identity()) {
            Some(current) if current.id() == link.id() => {
                peers.remove(link.identity());
                true
            }
            _ => false,
        }
    }
}

struct ServerLinkHandler {
    shared: Weak<ServerShared>,
}

impl LinkHandler for ServerLinkHandler {
    fn frame_received(&self, link: &PeerLink, frame: Frame) {
        if let Some(shared) = self.shared.upgrade() {
            shared.core.deliver(frame, link.identity());
        }
    }

    fn link_closed(&self, link: &PeerLink, error: Option<MessagingError>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if shared.remove_link(link) {
            match error {
                Some(err) => info!(peer = %link.identity(), reason = %err, "peer disconnected"),
                None => debug!(peer = %link.identity(), "peer link removed"),
            }
        }
    }
}
