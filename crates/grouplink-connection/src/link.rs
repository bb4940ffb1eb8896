//! One authenticated peer stream.
//!
//! A link owns two threads. The reader turns incoming frames into calls on a
//! [`LinkHandler`]; the writer drains a FIFO queue of encoded envelopes, so
//! frames reach the transport in the order they were queued. Closing a link
//! shuts the socket down, which unblocks both threads; anything still queued
//! completes with [`MessagingError::Cancelled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use bytes::Bytes;
use grouplink_frame::{Frame, FrameError, FrameReader, FrameWriter, MESSAGE};
use grouplink_message::ProcessIdentity;
use grouplink_transport::{IpcStream, TransportError};
use tracing::{debug, warn};

use crate::error::{BroadcastFailure, MessagingError, Result};
use crate::sync::lock;

/// Single-shot completion for a send.
pub type Completion = Box<dyn FnOnce(Result<()>) + Send + 'static>;

struct Outgoing {
    frame: Bytes,
    completion: Completion,
}

/// Owner-side reactions to link events, invoked on the link's reader thread.
pub(crate) trait LinkHandler: Send + Sync + 'static {
    fn frame_received(&self, link: &PeerLink, frame: Frame);

    /// The reader stopped. `error` is `None` when the link was closed locally.
    fn link_closed(&self, link: &PeerLink, error: Option<MessagingError>);
}

pub(crate) struct PeerLink {
    id: u64,
    epoch: u64,
    identity: ProcessIdentity,
    outbox: Mutex<Option<Sender<Outgoing>>>,
    shutdown: IpcStream,
    closed: Arc<AtomicBool>,
}

/// The I/O half of a link, not yet running.
pub(crate) struct LinkIo {
    reader: FrameReader<IpcStream>,
    writer: FrameWriter<IpcStream>,
    outbox: Receiver<Outgoing>,
}

impl PeerLink {
    /// `epoch` is the owner's run that admitted this peer.
    pub(crate) fn new(
        id: u64,
        epoch: u64,
        identity: ProcessIdentity,
        reader: FrameReader<IpcStream>,
        writer: FrameWriter<IpcStream>,
    ) -> Result<(Arc<Self>, LinkIo)> {
        let shutdown = reader.get_ref().try_clone()?;
        let (tx, rx) = mpsc::channel();
        let link = Arc::new(Self {
            id,
            epoch,
            identity,
            outbox: Mutex::new(Some(tx)),
            shutdown,
            closed: Arc::new(AtomicBool::new(false)),
        });
        let io = LinkIo {
            reader,
            writer,
            outbox: rx,
        };
        Ok((link, io))
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue an encoded envelope. A closed link completes it with `Cancelled`.
    pub(crate) fn enqueue(&self, frame: Bytes, completion: Completion) {
        let rejected = {
            let outbox = lock(&self.outbox);
            match outbox.as_ref() {
                Some(tx) if !self.is_closed() => tx
                    .send(Outgoing { frame, completion })
                    .err()
                    .map(|err| err.0.completion),
                _ => Some(completion),
            }
        };

        if let Some(completion) = rejected {
            completion(Err(MessagingError::Cancelled));
        }
    }

    /// Close the link. Returns `false` if it was already closed.
    pub(crate) fn close(&self) -> bool {
        let was_open = !self.closed.swap(true, Ordering::AcqRel);
        lock(&self.outbox).take();
        if let Err(err) = self.shutdown.shutdown() {
            debug!(peer = %self.identity, error = %err, "shutdown on closing link failed");
        }
        if was_open {
            debug!(peer = %self.identity, link = self.id, "link closed");
        }
        was_open
    }
}

impl LinkIo {
    /// Start the reader and writer threads.
    pub(crate) fn spawn(self, link: &Arc<PeerLink>, handler: Arc<dyn LinkHandler>) -> Result<()> {
        let LinkIo {
            reader,
            writer,
            outbox,
        } = self;

        let closed = Arc::clone(&link.closed);
        let peer = link.identity.clone();
        thread::Builder::new()
            .name(format!("grouplink-tx-{}", link.id))
            .spawn(move || write_loop(writer, outbox, closed, peer))
            .map_err(TransportError::Io)?;

        let reader_link = Arc::clone(link);
        thread::Builder::new()
            .name(format!("grouplink-rx-{}", link.id))
            .spawn(move || read_loop(reader, reader_link, handler))
            .map_err(TransportError::Io)?;

        Ok(())
    }
}

fn read_loop(mut reader: FrameReader<IpcStream>, link: Arc<PeerLink>, handler: Arc<dyn LinkHandler>) {
    let error = loop {
        match reader.read_frame() {
            Ok(frame) => handler.frame_received(&link, frame),
            Err(err) => break err,
        }
    };

    let error = match error {
        FrameError::ConnectionClosed => {
            MessagingError::Disconnected("peer closed the connection".to_string())
        }
        other => MessagingError::Frame(other),
    };

    if link.close() {
        debug!(peer = %link.identity, error = %error, "link reader stopped");
        handler.link_closed(&link, Some(error));
    } else {
        handler.link_closed(&link, None);
    }
}

fn write_loop(
    mut writer: FrameWriter<IpcStream>,
    outbox: Receiver<Outgoing>,
    closed: Arc<AtomicBool>,
    peer: ProcessIdentity,
) {
    // Set when the stream broke under us; the reader reports the teardown.
    let mut broken = false;

    for Outgoing { frame, completion } in outbox {
        if broken || closed.load(Ordering::Acquire) {
            completion(Err(MessagingError::Cancelled));
            continue;
        }

        match writer.send(MESSAGE, &frame) {
            Ok(()) => completion(Ok(())),
            Err(err @ FrameError::PayloadTooLarge { .. }) => completion(Err(err.into())),
            // A local close shuts the socket down under an in-flight write.
            Err(_) if closed.load(Ordering::Acquire) => {
                broken = true;
                completion(Err(MessagingError::Cancelled));
            }
            Err(err) => {
                warn!(peer = %peer, error = %err, "write failed; shutting link down");
                broken = true;
                if let Err(shutdown_err) = writer.get_ref().shutdown() {
                    debug!(peer = %peer, error = %shutdown_err, "shutdown after failed write failed");
                }
                completion(Err(err.into()));
            }
        }
    }
}

/// Send one encoded envelope to every link and report once all are done.
///
/// Completes with `Ok(())` when every link succeeded, otherwise with
/// [`MessagingError::Broadcast`] naming each failed peer.
pub(crate) fn broadcast(links: &[Arc<PeerLink>], frame: Bytes, completion: Completion) {
    if links.is_empty() {
        completion(Ok(()));
        return;
    }

    let tally = Arc::new(Mutex::new(Tally {
        remaining: links.len(),
        failures: Vec::new(),
        completion: Some(completion),
    }));

    for link in links {
        let tally = Arc::clone(&tally);
        let peer = link.identity().clone();
        link.enqueue(
            frame.clone(),
            Box::new(move |result| Tally::record(&tally, peer, result)),
        );
    }
}

struct Tally {
    remaining: usize,
    failures: Vec<(ProcessIdentity, MessagingError)>,
    completion: Option<Completion>,
}

impl Tally {
    fn record(tally: &Mutex<Tally>, peer: ProcessIdentity, result: Result<()>) {
        let finished = {
            let mut tally = lock(tally);
            if let Err(err) = result {
                tally.failures.push((peer, err));
            }
            tally.remaining -= 1;
            if tally.remaining == 0 {
                tally
                    .completion
                    .take()
                    .map(|completion| (completion, std::mem::take(&mut tally.failures)))
            } else {
                None
            }
        };

        if let Some((completion, mut failures)) = finished {
            if failures.is_empty() {
                completion(Ok(()));
            } else {
                failures.sort_by(|a, b| a.0.cmp(&b.0));
                completion(Err(MessagingError::Broadcast(BroadcastFailure { failures })));
            }
        }
    }
}
