use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use grouplink_frame::{FrameReader, FrameWriter};
use grouplink_message::{Message, ProcessIdentity};
use grouplink_transport::IpcStream;

use crate::config::EndpointConfig;
use crate::error::{MessagingError, Result};
use crate::link::PeerLink;
use crate::observer::MessageObserver;
use crate::sync::lock;

static NEXT_DIR: AtomicU64 = AtomicU64::new(0);

/// Endpoint in a private runtime dir, identified as `name` with our own pid.
pub(crate) fn test_config(namespace: &str, name: &str) -> EndpointConfig {
    let dir = std::env::temp_dir().join(format!(
        "glc-{}-{}",
        std::process::id(),
        NEXT_DIR.fetch_add(1, Ordering::Relaxed)
    ));
    EndpointConfig::new(namespace, 0)
        .with_runtime_dir(dir)
        .with_local_identity(ProcessIdentity::new(name, std::process::id()))
}

/// A link for `epoch` whose I/O threads never run, plus the far end of its socket.
pub(crate) fn idle_link(id: u64, epoch: u64, name: &str) -> (Arc<PeerLink>, IpcStream) {
    let (local, remote) = IpcStream::pair().expect("socket pair");
    let reader = FrameReader::new(local.try_clone().expect("clone"));
    let (link, _io) = PeerLink::new(
        id,
        epoch,
        ProcessIdentity::new(name, std::process::id()),
        reader,
        FrameWriter::new(local),
    )
    .expect("link");
    (link, remote)
}

/// Forwards every observer call into a channel.
pub(crate) struct ChannelObserver {
    tx: Mutex<mpsc::Sender<Result<(Message, ProcessIdentity)>>>,
}

impl ChannelObserver {
    pub(crate) fn new() -> (
        Arc<Self>,
        mpsc::Receiver<Result<(Message, ProcessIdentity)>>,
    ) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self { tx: Mutex::new(tx) }), rx)
    }
}

impl MessageObserver for ChannelObserver {
    fn message_received(&self, message: Message, sender: &ProcessIdentity) {
        let _ = lock(&self.tx).send(Ok((message, sender.clone())));
    }

    fn receive_failed(&self, error: MessagingError, _sender: &ProcessIdentity) {
        let _ = lock(&self.tx).send(Err(error));
    }
}
