use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use grouplink_connection::{
    Admission, AdmissionPolicy, Connection, MessageObserver, MessagingError, ServerConnection,
};
use grouplink_message::{Message, ProcessIdentity};
use tracing::{info, warn};

use crate::cmd::ListenArgs;
use crate::exit::{messaging_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_message, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Hands received messages to the main thread.
struct Forwarder {
    tx: Mutex<Sender<(Message, ProcessIdentity)>>,
}

impl MessageObserver for Forwarder {
    fn message_received(&self, message: Message, sender: &ProcessIdentity) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = tx.send((message, sender.clone()));
    }

    fn receive_failed(&self, error: MessagingError, sender: &ProcessIdentity) {
        warn!(peer = %sender, error = %error, "undeliverable message");
    }
}

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let server = ServerConnection::new(args.endpoint.config());
    server.set_allow_list(args.endpoint.allow_list());

    let rejected = args.reject;
    let policy: Arc<dyn AdmissionPolicy> = Arc::new(move |peer: &ProcessIdentity| {
        if rejected.iter().any(|name| name == peer.name()) {
            info!(peer = %peer, "rejecting peer");
            Admission::reject(format!("{} is not admitted", peer.name()))
        } else {
            info!(peer = %peer, "admitting peer");
            Admission::Accept
        }
    });
    server.set_admission_policy(&policy);

    let (tx, rx) = mpsc::channel();
    let observer: Arc<dyn MessageObserver> = Arc::new(Forwarder { tx: Mutex::new(tx) });
    server.set_observer(&observer);

    server.start();
    if !server.is_valid() {
        return Err(server
            .last_error()
            .map(|err| messaging_error("listen failed", &err))
            .unwrap_or_else(|| CliError::new(INTERNAL, "listen failed")));
    }
    if let Ok(path) = server.config().socket_path() {
        info!(path = %path.display(), identity = %server.local_identity(), "listening");
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let (message, sender) = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(received) => received,
            Err(RecvTimeoutError::Timeout) => {
                if !server.is_valid() {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        print_message(&message, &sender, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    let failure = (!server.is_valid()).then(|| server.last_error()).flatten();
    server.invalidate();
    match failure {
        Some(err) => Err(messaging_error("server failed", &err)),
        None => Ok(SUCCESS),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
